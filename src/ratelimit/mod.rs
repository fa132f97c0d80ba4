//! Rate limiting logic and counter stores.

mod decision;
mod distributed;
mod identity;
mod limiter;
mod local;
mod redis_buckets;
mod rule;
mod shared;
mod store;
mod sweep;
mod whitelist;
mod window;

pub use decision::{Decision, Rejection};
pub use distributed::{BucketBackend, DistributedStore, MAX_WINDOW};
pub use identity::{IdentityContext, KeyResolver, Resolution, ANONYMOUS};
pub use limiter::{open_store, Limiter, LimiterBuilder, DEFAULT_PREFIX};
pub use local::LocalStore;
pub use redis_buckets::RedisBuckets;
pub use rule::{DynamicKey, KeyStrategy, LimitRule, RuleConfig, DEFAULT_MESSAGE, DEFAULT_STATUS};
pub use shared::{SharedCounters, SharedMemoryCounters, SharedStore};
pub use store::CounterStore;
pub use sweep::{spawn_sweeper, SweeperHandle};
pub use whitelist::Whitelist;
pub use window::{Clock, FixedWindow, MockClock, SystemClock};
