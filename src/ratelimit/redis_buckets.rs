//! Redis implementation of the distributed bucket backend.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisResult};
use tracing::{info, trace};

use super::distributed::BucketBackend;
use crate::error::{LimiterError, Result};

/// Keys requested per `SCAN` page.
const SCAN_COUNT: usize = 1000;

/// Await a single Redis command, failing it once `timeout` has elapsed.
///
/// Both an expired deadline and a Redis error surface as
/// [`LimiterError::StoreOperationFailed`]; nothing is retried.
pub(crate) async fn with_deadline<T, F>(command: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = RedisResult<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| {
            LimiterError::StoreOperationFailed(format!("{} deadline exceeded after {:?}", command, timeout))
        })?
        .map_err(|e| LimiterError::StoreOperationFailed(format!("{} failed: {}", command, e)))
}

/// Redis-backed buckets: one hash per bucket, `HINCRBY` per increment.
///
/// Commands that do not finish within the command timeout fail with
/// [`LimiterError::StoreOperationFailed`]. They are never retried, since a
/// retried `HINCRBY` may count twice.
#[derive(Clone)]
pub struct RedisBuckets {
    conn: ConnectionManager,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisBuckets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBuckets")
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl RedisBuckets {
    /// Connect to Redis and verify the connection with a `PING`.
    pub async fn connect(url: &str, connect_timeout: Duration, command_timeout: Duration) -> Result<Self> {
        let client = Client::open(url).map_err(|e| LimiterError::BackendUnavailable(e.to_string()))?;

        let mut conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| LimiterError::BackendUnavailable("Connection timed out".to_string()))?
            .map_err(|e| LimiterError::BackendUnavailable(e.to_string()))?;

        let pong: RedisResult<String> =
            tokio::time::timeout(connect_timeout, redis::cmd("PING").query_async(&mut conn))
                .await
                .map_err(|_| LimiterError::BackendUnavailable("PING timed out".to_string()))?;
        pong.map_err(|e| LimiterError::BackendUnavailable(e.to_string()))?;

        info!(url = %url, "Connected to Redis counter backend");
        Ok(Self { conn, command_timeout })
    }

    async fn run<T, F>(&self, command: &str, fut: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        with_deadline(command, self.command_timeout, fut).await
    }
}

#[async_trait]
impl BucketBackend for RedisBuckets {
    async fn increment_field(&self, bucket: &str, field: &str, step: u64) -> Result<u64> {
        let mut conn = self.conn.clone();
        let value: i64 = self.run("HINCRBY", conn.hincr(bucket, field, step)).await?;
        Ok(value.max(0) as u64)
    }

    /// Walks the keyspace with `SCAN`; each page gets its own deadline so a
    /// large keyspace does not fail the listing as a whole.
    async fn list_buckets(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}-*", prefix);
        let mut buckets = Vec::new();
        let mut cursor: u64 = 0;
        let mut pages = 0usize;

        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor).arg("MATCH").arg(&pattern).arg("COUNT").arg(SCAN_COUNT);
            let (next, keys): (u64, Vec<String>) = self.run("SCAN", scan.query_async(&mut conn)).await?;

            buckets.extend(keys);
            pages += 1;
            if next == 0 {
                break;
            }
            cursor = next;
        }

        trace!(pattern = %pattern, pages = pages, found = buckets.len(), "Listed buckets");
        Ok(buckets)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self.run("DEL", conn.del(bucket)).await?;
        Ok(())
    }
}
