//! Distributed counter store using one hash bucket per calendar day.
//!
//! Every counter for a given day lives as a field of a single bucket named
//! `<prefix>-<YYYY-MM-DD>` (UTC). Expiry is bulk: a daily sweep deletes
//! every bucket whose date is not today. Windows longer than a day would be
//! dropped mid-window, so the store advertises a one day maximum ttl.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, trace, warn};

use super::store::CounterStore;
use super::window::{Clock, FixedWindow, SystemClock};
use crate::error::Result;

/// Longest window the daily buckets can hold.
pub const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default interval between bucket sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = MAX_WINDOW;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Remote key-value operations the distributed store needs.
///
/// Each call is a single remote operation; implementations enforce their
/// own deadline and report expiry as
/// [`StoreOperationFailed`](crate::error::LimiterError::StoreOperationFailed).
#[async_trait]
pub trait BucketBackend: Send + Sync + Debug {
    /// Atomically add `step` to `field` of hash `bucket`, returning the new value.
    async fn increment_field(&self, bucket: &str, field: &str, step: u64) -> Result<u64>;

    /// Names of all buckets starting with `prefix`.
    async fn list_buckets(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete a whole bucket.
    async fn delete_bucket(&self, bucket: &str) -> Result<()>;
}

/// Counter store over a [`BucketBackend`].
#[derive(Debug)]
pub struct DistributedStore {
    backend: Arc<dyn BucketBackend>,
    clock: Arc<dyn Clock>,
    bucket_prefix: String,
    sweep_interval: Duration,
}

impl DistributedStore {
    /// Create a store and clear out buckets left over from earlier days.
    ///
    /// The backend is expected to be reachable already. A failed first
    /// sweep is logged; stale buckets then wait for the next sweep.
    pub async fn new(backend: Arc<dyn BucketBackend>, bucket_prefix: impl Into<String>) -> Result<Self> {
        Self::with_clock(backend, bucket_prefix, Arc::new(SystemClock::new())).await
    }

    /// Like [`DistributedStore::new`], with an explicit clock.
    pub async fn with_clock(
        backend: Arc<dyn BucketBackend>,
        bucket_prefix: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store = Self {
            backend,
            clock,
            bucket_prefix: bucket_prefix.into(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        };

        if let Err(e) = store.sweep_stale_buckets().await {
            warn!(error = %e, "Initial bucket sweep failed, leaving it to the background sweeper");
        }

        info!(bucket_prefix = %store.bucket_prefix, "Distributed counter store initialized");
        Ok(store)
    }

    /// Set how often the background sweep should run.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Bucket holding the counters for the day containing `now`.
    pub fn bucket_for(&self, now: DateTime<Utc>) -> String {
        format!("{}-{}", self.bucket_prefix, now.format(DATE_FORMAT))
    }

    fn bucket_date(&self, bucket: &str) -> Option<NaiveDate> {
        let date = bucket
            .strip_prefix(self.bucket_prefix.as_str())?
            .strip_prefix('-')?;
        NaiveDate::parse_from_str(date, DATE_FORMAT).ok()
    }

    /// Delete every bucket dated other than today.
    ///
    /// Individual delete failures are logged and skipped; whatever is left
    /// is picked up by the next sweep. Only a failure to list buckets is
    /// returned as an error.
    pub async fn sweep_stale_buckets(&self) -> Result<usize> {
        let today = self.clock.now().date_naive();
        let buckets = self.backend.list_buckets(&self.bucket_prefix).await?;

        let mut deleted = 0;
        for bucket in buckets {
            match self.bucket_date(&bucket) {
                Some(date) if date != today => {}
                _ => continue,
            }

            match self.backend.delete_bucket(&bucket).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(bucket = %bucket, error = %e, "Failed to delete stale bucket"),
            }
        }

        debug!(deleted = deleted, "Swept stale counter buckets");
        Ok(deleted)
    }
}

#[async_trait]
impl CounterStore for DistributedStore {
    async fn increase(&self, key: &str, ttl: Duration, step: u64) -> Result<u64> {
        let now = self.clock.now();
        let window = FixedWindow::containing(now, ttl);
        let bucket = self.bucket_for(now);

        let value = self
            .backend
            .increment_field(&bucket, &window.slot_key(key), step)
            .await?;

        trace!(
            key = %key,
            bucket = %bucket,
            window = window.start_ms(),
            value = value,
            "Incremented distributed counter"
        );
        Ok(value)
    }

    fn name(&self) -> &'static str {
        "distributed"
    }

    fn max_ttl(&self) -> Option<Duration> {
        Some(MAX_WINDOW)
    }

    fn sweep_interval(&self) -> Option<Duration> {
        Some(self.sweep_interval)
    }

    async fn sweep(&self) -> Result<usize> {
        self.sweep_stale_buckets().await
    }
}
