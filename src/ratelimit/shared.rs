//! Counter store backed by a host-provided shared counter primitive.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, trace};

use super::store::CounterStore;
use super::window::{Clock, FixedWindow, SystemClock};
use crate::error::{LimiterError, Result};

/// Purge expired slots after this many slot creations.
const PURGE_EVERY: u64 = 1024;

/// An atomic, self-expiring counter primitive shared by every limiter on a host.
///
/// Implementations increment `slot` by `step` and return the new value. A
/// slot that does not exist, or whose ttl has elapsed, starts over at `step`
/// and lives for `ttl` from that moment.
pub trait SharedCounters: Send + Sync + Debug {
    /// Whether the primitive can be used at all.
    fn is_enabled(&self) -> bool;

    /// Atomically add `step` to `slot`.
    fn increment(&self, slot: &str, step: u64, ttl: Duration) -> Result<u64>;
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    value: u64,
    expires_at_ms: i64,
}

/// In-process implementation of [`SharedCounters`].
///
/// Share one instance (behind an `Arc`) between every limiter that should
/// count against the same slots.
#[derive(Debug)]
pub struct SharedMemoryCounters {
    slots: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
    created: AtomicU64,
}

impl SharedMemoryCounters {
    /// Create an empty counter table using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create an empty counter table driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            clock,
            created: AtomicU64::new(0),
        }
    }

    /// Number of slots currently held, expired or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slots are held.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every slot whose ttl has elapsed.
    pub fn purge_expired(&self) -> usize {
        let now_ms = self.clock.now().timestamp_millis();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.expires_at_ms > now_ms);
        before.saturating_sub(self.slots.len())
    }
}

impl Default for SharedMemoryCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedCounters for SharedMemoryCounters {
    fn is_enabled(&self) -> bool {
        true
    }

    fn increment(&self, slot: &str, step: u64, ttl: Duration) -> Result<u64> {
        let now_ms = self.clock.now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let fresh = Slot {
            value: step,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        };

        let (value, created) = match self.slots.entry(slot.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get_mut();
                if current.expires_at_ms <= now_ms {
                    *current = fresh;
                } else {
                    current.value = current.value.saturating_add(step);
                }
                (current.value, false)
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
                (step, true)
            }
        };

        if created && (self.created.fetch_add(1, Ordering::Relaxed) + 1) % PURGE_EVERY == 0 {
            let purged = self.purge_expired();
            debug!(purged = purged, "Purged expired shared counter slots");
        }

        Ok(value)
    }
}

/// Counter store delegating to a [`SharedCounters`] primitive.
///
/// The slot name carries its own window and ttl, so the store keeps no
/// expiry bookkeeping of its own.
#[derive(Debug)]
pub struct SharedStore {
    counters: Arc<dyn SharedCounters>,
    clock: Arc<dyn Clock>,
}

impl SharedStore {
    /// Wrap a shared primitive, failing if it is not usable.
    pub fn new(counters: Arc<dyn SharedCounters>) -> Result<Self> {
        Self::with_clock(counters, Arc::new(SystemClock::new()))
    }

    /// Wrap a shared primitive, computing windows against `clock`.
    pub fn with_clock(counters: Arc<dyn SharedCounters>, clock: Arc<dyn Clock>) -> Result<Self> {
        if !counters.is_enabled() {
            return Err(LimiterError::BackendUnavailable(
                "shared counter primitive is not enabled".to_string(),
            ));
        }
        info!("Shared counter store initialized");
        Ok(Self { counters, clock })
    }
}

#[async_trait]
impl CounterStore for SharedStore {
    async fn increase(&self, key: &str, ttl: Duration, step: u64) -> Result<u64> {
        let window = FixedWindow::containing(self.clock.now(), ttl);
        let slot = window.slot_key(key);
        let value = self.counters.increment(&slot, step, ttl)?;
        trace!(key = %key, window = window.start_ms(), value = value, "Incremented shared counter");
        Ok(value)
    }

    fn name(&self) -> &'static str {
        "shared"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::window::MockClock;

    #[derive(Debug)]
    struct DisabledCounters;

    impl SharedCounters for DisabledCounters {
        fn is_enabled(&self) -> bool {
            false
        }

        fn increment(&self, _slot: &str, _step: u64, _ttl: Duration) -> Result<u64> {
            Err(LimiterError::StoreOperationFailed("disabled".to_string()))
        }
    }

    fn shared_at(millis: i64) -> (Arc<SharedMemoryCounters>, MockClock) {
        let clock = MockClock::at_millis(millis);
        (Arc::new(SharedMemoryCounters::with_clock(Arc::new(clock.clone()))), clock)
    }

    #[test]
    fn test_disabled_primitive_is_rejected_at_construction() {
        let err = SharedStore::new(Arc::new(DisabledCounters)).unwrap_err();
        assert!(matches!(err, LimiterError::BackendUnavailable(_)));
    }

    #[test]
    fn test_slot_expires_naturally() {
        let (counters, clock) = shared_at(0);
        let ttl = Duration::from_secs(2);

        assert_eq!(counters.increment("slot", 1, ttl).unwrap(), 1);
        assert_eq!(counters.increment("slot", 1, ttl).unwrap(), 2);

        clock.advance(Duration::from_secs(2));
        assert_eq!(counters.increment("slot", 5, ttl).unwrap(), 5);
    }

    #[test]
    fn test_purge_expired() {
        let (counters, clock) = shared_at(0);

        counters.increment("short", 1, Duration::from_secs(1)).unwrap();
        counters.increment("long", 1, Duration::from_secs(10)).unwrap();

        clock.advance(Duration::from_secs(1));
        assert_eq!(counters.purge_expired(), 1);
        assert_eq!(counters.len(), 1);
    }

    #[tokio::test]
    async fn test_stores_sharing_a_primitive_share_counts() {
        let (counters, clock) = shared_at(0);
        let first = SharedStore::with_clock(counters.clone(), Arc::new(clock.clone())).unwrap();
        let second = SharedStore::with_clock(counters.clone(), Arc::new(clock.clone())).unwrap();
        let ttl = Duration::from_secs(1);

        assert_eq!(first.increase("k", ttl, 1).await.unwrap(), 1);
        assert_eq!(second.increase("k", ttl, 1).await.unwrap(), 2);
        assert_eq!(first.increase("k", ttl, 1).await.unwrap(), 3);
    }

    #[test]
    fn test_store_windows_follow_epoch() {
        let (counters, clock) = shared_at(700);
        let store = SharedStore::with_clock(counters, Arc::new(clock.clone())).unwrap();
        let ttl = Duration::from_secs(1);

        tokio_test::block_on(async {
            assert_eq!(store.increase("k", ttl, 1).await.unwrap(), 1);
            assert_eq!(store.increase("k", ttl, 1).await.unwrap(), 2);

            // 1.2s is a new window even though the slot's own ttl has not run out
            clock.advance(Duration::from_millis(500));
            assert_eq!(store.increase("k", ttl, 1).await.unwrap(), 1);
        });
    }
}
