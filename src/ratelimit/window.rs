//! Epoch-aligned fixed windows and the clock they are measured against.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of wall-clock time.
///
/// Windows are aligned to the Unix epoch, so stores need wall time rather
/// than a monotonic `Instant`.
pub trait Clock: Send + Sync + Debug {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// System clock backed by `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable clock for tests and simulations.
///
/// Clones share the same underlying time, so advancing one advances all.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific time.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a mock clock starting `millis` milliseconds after the epoch.
    pub fn at_millis(millis: i64) -> Self {
        Self::new(DateTime::from_timestamp_millis(millis).unwrap_or_default())
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut time = self.current_time.lock();
        let next = chrono::Duration::from_std(duration)
            .ok()
            .and_then(|step| time.checked_add_signed(step));
        if let Some(next) = next {
            *time = next;
        }
    }

    /// Set the clock to a specific time.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.current_time.lock() = time;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current_time.lock()
    }
}

/// One fixed window: `[start, start + ttl)` with `start = floor(now / ttl) * ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedWindow {
    start_ms: i64,
    ttl_ms: i64,
}

impl FixedWindow {
    /// The window of length `ttl` that contains `now`.
    ///
    /// Sub-millisecond ttls are rounded up to one millisecond.
    pub fn containing(now: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);
        let now_ms = now.timestamp_millis();
        Self {
            start_ms: now_ms.div_euclid(ttl_ms) * ttl_ms,
            ttl_ms,
        }
    }

    /// Window start in milliseconds since the epoch.
    pub fn start_ms(&self) -> i64 {
        self.start_ms
    }

    /// Window end (exclusive) in milliseconds since the epoch.
    pub fn end_ms(&self) -> i64 {
        self.start_ms.saturating_add(self.ttl_ms)
    }

    /// Window length in milliseconds.
    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    /// Whether the window has closed at `now`.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() >= self.end_ms()
    }

    /// Time left until the window closes.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let left = self.end_ms().saturating_sub(now.timestamp_millis()).max(0);
        Duration::from_millis(left as u64)
    }

    /// Qualify a logical key with this window: `<key>-<start>-<ttl>`.
    pub fn slot_key(&self, key: &str) -> String {
        format!("{}-{}-{}", key, self.start_ms, self.ttl_ms)
    }
}
