//! Periodic queue maintenance: stall recovery and retention sweeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::queue::ScreenshotQueue;

/// Runs stall recovery on a short cadence and the retention sweep on a long
/// one, independent of job processing.
pub struct QueueJanitor {
    queue: Arc<ScreenshotQueue>,
    liveness_interval: Duration,
    sweep_interval: Duration,
}

impl QueueJanitor {
    pub fn new(
        queue: Arc<ScreenshotQueue>,
        liveness_interval: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            queue,
            liveness_interval,
            sweep_interval,
        }
    }

    pub fn spawn(self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut liveness = tokio::time::interval(self.liveness_interval);
            let mut sweep = tokio::time::interval(self.sweep_interval);
            // Skip the immediate first tick of both timers.
            liveness.tick().await;
            sweep.tick().await;

            info!(
                target = "application::janitor",
                liveness_interval_s = self.liveness_interval.as_secs(),
                sweep_interval_s = self.sweep_interval.as_secs(),
                "Queue janitor started"
            );

            loop {
                tokio::select! {
                    _ = liveness.tick() => {
                        match self.queue.recover_stalled().await {
                            Ok(0) => {}
                            Ok(recovered) => info!(
                                target = "application::janitor",
                                recovered,
                                "Recovered stalled jobs"
                            ),
                            Err(err) => warn!(
                                target = "application::janitor",
                                error = %err,
                                "Stall recovery pass failed"
                            ),
                        }
                    }
                    _ = sweep.tick() => {
                        if let Err(err) = self.queue.sweep().await {
                            warn!(
                                target = "application::janitor",
                                error = %err,
                                "Retention sweep failed"
                            );
                        }
                    }
                    _ = stop.changed() => break,
                }
            }

            info!(target = "application::janitor", "Queue janitor stopped");
        })
    }
}
