//! Job cleaner
//!
//! Periodically prunes completed and failed jobs older than the retention
//! period. While prunes keep reporting a full batch the cleaner comes back
//! after a few seconds; once the backlog is gone it waits the full prune
//! interval. All pauses are jittered so instances do not prune in lockstep.

use lapse_core::Cancellation;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span};

use crate::context::{WorkerContext, before};

/// Pause after a prune that reported more work
const BUSY_INTERVAL: Duration = Duration::from_secs(5);

/// Consecutive busy prunes after which the full interval applies again
const MAX_BUSY_STREAK: u32 = 16;

/// Background loop removing old terminal jobs
pub struct JobCleaner {
    context: Arc<WorkerContext>,
}

impl JobCleaner {
    pub fn new(context: Arc<WorkerContext>) -> Self {
        Self { context }
    }

    /// Starts the pruning loop, returning once `shutdown` fires
    pub async fn run(&self, shutdown: Cancellation) -> anyhow::Result<()> {
        self.prune_until(shutdown)
            .instrument(info_span!("cleaner"))
            .await;
        Ok(())
    }

    async fn prune_until(&self, shutdown: Cancellation) {
        let config = &self.context.config;
        info!(
            "Starting job cleaner (interval: {:?}, retention: {:?})",
            config.prune_interval, config.keep_finished
        );

        let mut streak = 0u32;
        loop {
            let delay = jitter(next_delay(streak, config.prune_interval));
            if !shutdown.sleep(delay).await {
                break;
            }

            let cutoff = before(self.context.now(), config.keep_finished);
            streak = match self.context.storage.prune(cutoff).await {
                Ok(true) => {
                    debug!("Pruned a full batch of jobs finished before {}", cutoff);
                    streak.saturating_add(1)
                }
                Ok(false) => 0,
                Err(e) => {
                    error!("Failed to prune finished jobs: {:#}", e);
                    0
                }
            };
        }

        info!("Job cleaner stopped");
    }
}

/// Un-jittered pause before the next prune
fn next_delay(streak: u32, prune_interval: Duration) -> Duration {
    if streak > 0 && streak < MAX_BUSY_STREAK {
        BUSY_INTERVAL
    } else {
        prune_interval
    }
}

/// Scales `delay` by a random factor in `[0.7, 1.3]`
fn jitter(delay: Duration) -> Duration {
    delay.mul_f64(rand::rng().random_range(0.7..=1.3))
}
