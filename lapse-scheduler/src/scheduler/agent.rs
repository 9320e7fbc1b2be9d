//! Loop supervision
//!
//! Runs a background loop (poller or cleaner) in its own task and restarts it
//! when it fails or panics, pausing longer after each consecutive failure.
//! A loop that returns `Ok` has stopped for shutdown and is not restarted.

use lapse_core::Cancellation;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Failures after which the restart delay stops growing
const MAX_FAILURE_SCALE: u32 = 5;

/// Supervises a restartable loop until shutdown
///
/// # Arguments
/// * `name` - Loop name used in logs
/// * `ready` - Gate opened once the scheduler finished starting
/// * `shutdown` - Scheduler shutdown signal
/// * `start` - Builds a fresh run of the loop
pub async fn supervise<F, Fut>(
    name: &'static str,
    mut ready: watch::Receiver<bool>,
    shutdown: Cancellation,
    mut start: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let opened = tokio::select! {
        _ = shutdown.cancelled() => return,
        opened = ready.wait_for(|open| *open) => opened.is_ok(),
    };
    if !opened {
        warn!("Scheduler dropped before {} loop started", name);
        return;
    }

    let mut failures = 0u32;
    while !shutdown.is_cancelled() {
        match tokio::spawn(start()).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => {
                failures += 1;
                error!("{} loop failed (failure {}): {:#}", name, failures, e);
            }
            Err(e) if e.is_panic() => {
                failures += 1;
                error!("{} loop panicked (failure {}): {}", name, failures, e);
            }
            Err(e) => {
                warn!("{} loop cancelled: {}", name, e);
                return;
            }
        }

        let delay = restart_delay(failures);
        info!("Restarting {} loop in {:?}", name, delay);
        if !shutdown.sleep(delay).await {
            return;
        }
    }
}

/// Random delay in `[0.6, 1.0] * min(failures, 5)` seconds
pub fn restart_delay(failures: u32) -> Duration {
    let scale = f64::from(failures.min(MAX_FAILURE_SCALE));
    Duration::from_secs_f64(rand::rng().random_range(0.6..=1.0) * scale)
}
