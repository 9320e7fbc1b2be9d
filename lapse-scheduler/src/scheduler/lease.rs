//! Lease keep-alive
//!
//! Runs next to a job handler and keeps extending the lease of the claimed
//! job until the handler finishes. A renewal that reports the job is no
//! longer ours fires the "hijacked" source, which cancels the handler.

use lapse_core::{CancelSource, Cancellation, Job, WorkerId};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::WorkerContext;

/// Result of a single renewal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    /// Lease extended
    Kept,
    /// Storage error; the lease is assumed to still be ours
    Failed,
    /// Another worker owns the job now
    Lost,
}

/// How the lease ended once keep-alive stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Held,
    Lost,
}

/// Keeps the lease on `job` alive until `finished` fires
///
/// # Arguments
/// * `context` - Shared worker context
/// * `worker` - Owner of the lease
/// * `job` - Job snapshot returned by the claim
/// * `hijacked` - Cancelled when the lease is lost
/// * `finished` - Fires once the handler has returned
pub async fn maintain_claim(
    context: Arc<WorkerContext>,
    worker: WorkerId,
    job: Job,
    hijacked: CancelSource,
    finished: Cancellation,
) -> LeaseOutcome {
    let mut delay = context.config.keep_alive_interval;

    loop {
        if !finished.sleep(delay).await {
            return LeaseOutcome::Held;
        }

        let status = tokio::select! {
            _ = finished.cancelled() => return LeaseOutcome::Held,
            status = keep_claim(&context, worker, &job) => status,
        };

        delay = match status {
            ClaimStatus::Kept => context.config.keep_alive_interval,
            ClaimStatus::Failed => context.config.keep_alive_retry_interval,
            ClaimStatus::Lost => {
                warn!(job_id = %job.id, worker_id = %worker, "Lease lost, cancelling handler");
                hijacked.cancel();
                return LeaseOutcome::Lost;
            }
        };
    }
}

/// Attempts one renewal
async fn keep_claim(context: &WorkerContext, worker: WorkerId, job: &Job) -> ClaimStatus {
    let until = context.lease_until(context.now());

    match context.storage.keep_claim(worker, job, until).await {
        Ok(true) => {
            debug!(job_id = %job.id, "Lease extended until {}", until);
            ClaimStatus::Kept
        }
        Ok(false) => ClaimStatus::Lost,
        Err(e) => {
            warn!(job_id = %job.id, worker_id = %worker, "Failed to extend lease: {:#}", e);
            ClaimStatus::Failed
        }
    }
}
