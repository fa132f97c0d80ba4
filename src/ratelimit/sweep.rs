//! Background expiry sweeps for counter stores.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::store::CounterStore;

/// Handle to a running sweeper task. Dropping it stops the sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
    interval: Duration,
}

impl SweeperHandle {
    /// Interval between sweeps.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the sweeper task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the sweeper.
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a task that calls `store.sweep()` on the store's own interval.
///
/// Returns `None` for stores that need no sweeping. Must be called from
/// within a Tokio runtime. Sweep failures are logged and the next tick
/// tries again.
pub fn spawn_sweeper(store: Arc<dyn CounterStore>) -> Option<SweeperHandle> {
    let interval = store.sweep_interval()?;
    if interval.is_zero() {
        warn!(store = store.name(), "Sweep interval is zero, not starting sweeper");
        return None;
    }

    info!(
        store = store.name(),
        interval_secs = interval.as_secs_f64(),
        "Starting expiry sweeper"
    );

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match store.sweep().await {
                Ok(removed) => debug!(store = store.name(), removed = removed, "Expiry sweep finished"),
                Err(e) => warn!(store = store.name(), error = %e, "Expiry sweep failed"),
            }
        }
    });

    Some(SweeperHandle { task, interval })
}
