//! Background health loop.
//!
//! Ticks the aggregator on a fixed interval, independent of request
//! handling. The first tick runs immediately so the pending verdict is
//! replaced as soon as possible.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::aggregator::HealthAggregator;

/// Handle for the running health loop.
///
/// `stop()` waits for the loop to exit; dropping the handle only signals it.
pub struct HealthLoopHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HealthLoopHandle {
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Health loop ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for HealthLoopHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub fn start_health_loop(aggregator: Arc<HealthAggregator>, interval: Duration) -> HealthLoopHandle {
    let (tx, mut rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Health loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut rx => break,
                _ = ticker.tick() => {
                    let verdict = aggregator.tick().await;
                    tracing::debug!(verdict = %verdict.overall, "Health tick");
                }
            }
        }
        tracing::info!("Health loop stopped");
    });

    HealthLoopHandle {
        shutdown: Some(tx),
        task: Some(task),
    }
}
