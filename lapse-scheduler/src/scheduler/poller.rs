//! Job poller
//!
//! Claims due jobs from storage and executes them one at a time.
//! While a handler runs, a keep-alive task extends the lease; once the handler
//! returns the job is completed, retried with backoff or forgotten, unless the
//! lease was lost in the meantime, in which case it is left to its new owner.

use lapse_core::backoff::retry_delay;
use lapse_core::{CancelSource, Cancellation, Job, WorkerId};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::context::{WorkerContext, after};
use crate::scheduler::lease::{LeaseOutcome, maintain_claim};

/// Single worker slot running the claim, execute, finalize loop
pub struct JobPoller {
    worker: WorkerId,
    context: Arc<WorkerContext>,
}

impl JobPoller {
    /// Creates a new job poller with a fresh worker id
    pub fn new(context: Arc<WorkerContext>) -> Self {
        Self {
            worker: WorkerId::new(),
            context,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker
    }

    /// Starts the polling loop, returning once `shutdown` fires
    pub async fn run(&self, shutdown: Cancellation) -> anyhow::Result<()> {
        let span = info_span!("poller", worker_id = %self.worker);
        self.poll_until(shutdown).instrument(span).await;
        Ok(())
    }

    async fn poll_until(&self, shutdown: Cancellation) {
        info!(
            "Starting job poller (interval: {:?})",
            self.context.config.poll_interval
        );

        while !shutdown.is_cancelled() {
            match self.claim().await {
                Some(job) => self.process(job, &shutdown).await,
                None => {
                    if !shutdown.sleep(self.context.config.poll_interval).await {
                        break;
                    }
                }
            }
        }

        info!("Job poller stopped");
    }

    /// Claims one due job; storage errors count as nothing to do
    async fn claim(&self) -> Option<Job> {
        let now = self.context.now();
        let until = self.context.lease_until(now);

        match self.context.storage.claim(self.worker, now, until).await {
            Ok(Some(job)) => {
                info!(job_id = %job.id, attempt = job.attempt, kind = %job.payload.kind, "Claimed job");
                Some(job)
            }
            Ok(None) => {
                debug!("No jobs available");
                None
            }
            Err(e) => {
                error!("Failed to claim job: {:#}", e);
                None
            }
        }
    }

    /// Runs the handler under a maintained lease, then finalizes
    async fn process(&self, job: Job, shutdown: &Cancellation) {
        let hijacked = CancelSource::new();
        let finished = CancelSource::new();

        let keep_alive = tokio::spawn(maintain_claim(
            Arc::clone(&self.context),
            self.worker,
            job.clone(),
            hijacked.clone(),
            finished.signal(),
        ));

        let success = self
            .execute(&job, shutdown.join(&hijacked.signal()))
            .await;

        finished.cancel();
        let outcome = match keep_alive.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(job_id = %job.id, "Keep-alive task panicked: {}", e);
                LeaseOutcome::Held
            }
        };

        if outcome == LeaseOutcome::Lost || hijacked.is_cancelled() {
            warn!(
                job_id = %job.id,
                attempt = job.attempt,
                "Lease lost while executing, leaving job to its new owner"
            );
            return;
        }

        self.finalize(&job, success).await;
    }

    /// Runs the handler in its own task so a panic only fails the attempt
    async fn execute(&self, job: &Job, cancel: Cancellation) -> bool {
        let handler = Arc::clone(&self.context.handler);
        let payload = job.payload.clone();

        let task = tokio::spawn(
            async move { handler.handle(cancel, payload).await }.in_current_span(),
        );

        match task.await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(job_id = %job.id, attempt = job.attempt, "Job handler failed: {:#}", e);
                false
            }
            Err(e) => {
                error!(job_id = %job.id, attempt = job.attempt, "Job handler panicked: {}", e);
                false
            }
        }
    }

    /// Completes, retries or forgets the job
    ///
    /// Errors are logged and dropped: an unfinalized job is claimed again
    /// once its lease expires.
    async fn finalize(&self, job: &Job, success: bool) {
        let config = &self.context.config;
        let storage = &self.context.storage;
        let now = self.context.now();

        let result = if success {
            info!(job_id = %job.id, attempt = job.attempt, "Job completed");
            storage.complete(self.worker, job, now).await
        } else if job.attempt < config.retry_limit {
            let delay = retry_delay(config, job.attempt);
            info!(
                job_id = %job.id,
                attempt = job.attempt,
                "Job failed, retrying in {:?}",
                delay
            );
            storage.retry(self.worker, job, after(now, delay)).await
        } else {
            error!(
                job_id = %job.id,
                attempt = job.attempt,
                "Job failed {} time(s), giving up",
                job.attempt
            );
            storage.forget(self.worker, job, now).await
        };

        if let Err(e) = result {
            error!(job_id = %job.id, "Failed to finalize job: {:#}", e);
        }
    }
}
