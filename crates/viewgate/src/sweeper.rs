//! Background sweep: hold-limit eviction and pruning of empty queues.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::service::QueueService;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Run [`QueueService::sweep`] every `sweep_interval` until the service's
/// shutdown token fires.
pub fn spawn_sweeper(service: Arc<QueueService>) -> JoinHandle<()> {
    let period = service.config().sweep_interval.max(MIN_SWEEP_INTERVAL);
    let shutdown = service.shutdown_token();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evictions = service.sweep(Utc::now());
                    if !evictions.is_empty() {
                        tracing::info!(evicted = evictions.len(), "Hold limit sweep");
                    }
                }
            }
        }

        tracing::debug!("Sweeper stopped");
    })
}
