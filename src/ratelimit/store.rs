//! Counter store trait for abstracting the local, shared and distributed backends.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Trait for counter store implementations.
///
/// A store owns the counters for every `(key, window)` pair and is the only
/// shared mutable state in the limiter. Construction-time failures are
/// reported by each implementation's constructor; `increase` only fails on
/// transient backend errors.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Add `step` to the counter for `key` in the fixed window of length
    /// `ttl` containing the current time, returning the value after the
    /// increment.
    ///
    /// Concurrent calls for the same key never lose updates.
    async fn increase(&self, key: &str, ttl: Duration, step: u64) -> Result<u64>;

    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    /// Longest window this store can track correctly, if bounded.
    fn max_ttl(&self) -> Option<Duration> {
        None
    }

    /// How often [`CounterStore::sweep`] should run, if the store needs it.
    fn sweep_interval(&self) -> Option<Duration> {
        None
    }

    /// Drop state belonging to windows that have closed.
    ///
    /// Returns the number of entries (or buckets) removed.
    async fn sweep(&self) -> Result<usize> {
        Ok(0)
    }
}
