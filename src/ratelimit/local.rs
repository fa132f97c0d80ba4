//! Process-local counter store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::store::CounterStore;
use super::window::{Clock, FixedWindow, SystemClock};
use crate::error::Result;

/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// In-memory counter store for a single process.
///
/// Counters live in a sharded map keyed by window-qualified key, so
/// increments for different keys rarely contend. A companion index maps
/// each window end to the keys expiring then, which lets a sweep drop closed
/// windows without scanning every counter.
///
/// Lock order: a counter shard may be held while taking the expiry index,
/// never the reverse.
#[derive(Debug)]
pub struct LocalStore {
    /// Counter values indexed by window-qualified key
    counters: DashMap<String, u64>,
    /// Window end (epoch millis) -> keys whose window ends then
    expiry: Mutex<BTreeMap<i64, HashSet<String>>>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
}

impl LocalStore {
    /// Create a new local store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a new local store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            expiry: Mutex::new(BTreeMap::new()),
            clock,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Set how often the background sweep should run.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Current value of `key` in the window containing now, if any.
    pub fn get(&self, key: &str, ttl: Duration) -> Option<u64> {
        let window = FixedWindow::containing(self.clock.now(), ttl);
        self.counters.get(&window.slot_key(key)).map(|v| *v)
    }

    /// Number of live counter entries.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Number of distinct window ends awaiting expiry.
    pub fn pending_windows(&self) -> usize {
        self.expiry.lock().len()
    }

    /// Remove every counter whose window has closed.
    ///
    /// The expiry index lock is released before counters are removed, so
    /// concurrent increments on other keys only wait for their own shard.
    pub fn sweep_expired(&self) -> usize {
        let now_ms = self.clock.now().timestamp_millis();

        let expired = {
            let mut expiry = self.expiry.lock();
            let live = expiry.split_off(&now_ms.saturating_add(1));
            std::mem::replace(&mut *expiry, live)
        };

        let mut removed = 0;
        for (_, keys) in expired {
            for key in keys {
                if self.counters.remove(&key).is_some() {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            debug!(removed = removed, remaining = self.counters.len(), "Swept expired local counters");
        }
        removed
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for LocalStore {
    async fn increase(&self, key: &str, ttl: Duration, step: u64) -> Result<u64> {
        let window = FixedWindow::containing(self.clock.now(), ttl);
        let slot = window.slot_key(key);

        let value = match self.counters.entry(slot) {
            Entry::Occupied(mut entry) => {
                let value = entry.get_mut();
                *value = value.saturating_add(step);
                *value
            }
            Entry::Vacant(entry) => {
                self.expiry
                    .lock()
                    .entry(window.end_ms())
                    .or_default()
                    .insert(entry.key().clone());
                entry.insert(step);
                step
            }
        };

        trace!(key = %key, window = window.start_ms(), value = value, "Incremented local counter");
        Ok(value)
    }

    fn name(&self) -> &'static str {
        "local"
    }

    fn sweep_interval(&self) -> Option<Duration> {
        Some(self.sweep_interval)
    }

    async fn sweep(&self) -> Result<usize> {
        Ok(self.sweep_expired())
    }
}
