//! Scheduler orchestration
//!
//! A [`Scheduler`] owns the background loops of one instance: `worker_count`
//! pollers executing jobs and one cleaner pruning finished ones. All loops
//! share a shutdown signal and wait behind a ready gate until construction is
//! complete. Scheduling calls go straight to storage and report failures to
//! the caller.

pub mod agent;
pub mod cleaner;
pub mod lease;
pub mod poller;

pub use cleaner::JobCleaner;
pub use poller::JobPoller;

use chrono::{DateTime, Utc};
use lapse_core::{
    CancelSource, Clock, JobHandler, JobKind, JobStorage, Payload, SchedulerConfig, StorageError,
    SystemClock,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::context::{WorkerContext, after};

/// Builder for [`Scheduler`]
pub struct SchedulerBuilder {
    storage: Arc<dyn JobStorage>,
    handler: Arc<dyn JobHandler>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Clamps the configuration and starts all background loops
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Scheduler {
        let context = WorkerContext::new(self.storage, self.handler, self.clock, &self.config);
        Scheduler::launch(context)
    }
}

/// Running scheduler instance
pub struct Scheduler {
    context: Arc<WorkerContext>,
    shutdown: CancelSource,
    tasks: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Starts building a scheduler over `storage` executing jobs with `handler`
    ///
    /// Defaults to [`SchedulerConfig::default`] and the system clock.
    pub fn builder(
        storage: Arc<dyn JobStorage>,
        handler: impl JobHandler + 'static,
    ) -> SchedulerBuilder {
        SchedulerBuilder {
            storage,
            handler: Arc::new(handler),
            config: SchedulerConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Starts a scheduler with the system clock
    pub fn start(
        storage: Arc<dyn JobStorage>,
        handler: impl JobHandler + 'static,
        config: SchedulerConfig,
    ) -> Self {
        Self::builder(storage, handler).config(config).start()
    }

    fn launch(context: Arc<WorkerContext>) -> Self {
        let shutdown = CancelSource::new();
        let (ready_tx, ready) = watch::channel(false);
        let config = &context.config;

        info!(
            "Starting scheduler ({} worker(s), poll interval: {:?})",
            config.worker_count, config.poll_interval
        );

        let mut tasks = Vec::with_capacity(config.worker_count + 1);
        for _ in 0..config.worker_count {
            let poller = Arc::new(JobPoller::new(Arc::clone(&context)));
            let signal = shutdown.signal();
            tasks.push(tokio::spawn(agent::supervise(
                "poller",
                ready.clone(),
                signal.clone(),
                move || {
                    let poller = Arc::clone(&poller);
                    let signal = signal.clone();
                    async move { poller.run(signal).await }
                },
            )));
        }

        let cleaner = Arc::new(JobCleaner::new(Arc::clone(&context)));
        let signal = shutdown.signal();
        tasks.push(tokio::spawn(agent::supervise(
            "cleaner",
            ready,
            signal.clone(),
            move || {
                let cleaner = Arc::clone(&cleaner);
                let signal = signal.clone();
                async move { cleaner.run(signal).await }
            },
        )));

        ready_tx.send_replace(true);

        Self {
            context,
            shutdown,
            tasks,
        }
    }

    /// Clamped configuration in effect
    pub fn config(&self) -> &SchedulerConfig {
        &self.context.config
    }

    /// Schedules `payload` to run at `when`
    ///
    /// Storage failures are returned to the caller; nothing retries them.
    pub async fn schedule(
        &self,
        when: DateTime<Utc>,
        payload: Payload,
    ) -> Result<Uuid, StorageError> {
        let kind = payload.kind.clone();
        match self.context.storage.schedule(payload, when).await {
            Ok(id) => {
                info!(job_id = %id, kind = %kind, "Scheduled job for {}", when);
                Ok(id)
            }
            Err(e) => {
                error!(kind = %kind, "Failed to schedule job: {:#}", e);
                Err(e)
            }
        }
    }

    /// Schedules `payload` to run after `delay`
    pub async fn schedule_in(
        &self,
        delay: Duration,
        payload: Payload,
    ) -> Result<Uuid, StorageError> {
        self.schedule(after(self.context.now(), delay), payload)
            .await
    }

    /// Schedules a typed job to run at `when`
    pub async fn schedule_job<J: JobKind>(
        &self,
        when: DateTime<Utc>,
        job: &J,
    ) -> Result<Uuid, StorageError> {
        self.schedule(when, Payload::from_job(job)?).await
    }

    /// Stops all loops, waits for them, then closes the storage
    ///
    /// Running handlers see their cancellation signal fire; handlers ignoring
    /// it delay shutdown until they return.
    pub async fn shutdown(mut self) {
        info!("Shutting down scheduler");
        self.shutdown.cancel();

        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                error!("Scheduler task failed during shutdown: {}", e);
            }
        }

        self.context.storage.close().await;
        info!("Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingStorage;
    use lapse_core::{Cancellation, JobStatus, MonotonicClock};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::future::Future;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn paused_clock() -> Arc<dyn Clock> {
        Arc::new(MonotonicClock::new())
    }

    fn ok_handler(_cancel: Cancellation, _payload: Payload) -> impl Future<Output = anyhow::Result<()>> + Send {
        async { Ok(()) }
    }

    fn counting_handler(
        counter: Arc<AtomicUsize>,
        failures: usize,
    ) -> impl JobHandler + 'static {
        move |_cancel: Cancellation, _payload: Payload| {
            let counter = Arc::clone(&counter);
            async move {
                let run = counter.fetch_add(1, Ordering::SeqCst);
                anyhow::ensure!(run >= failures, "run {} fails", run);
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_job_runs_once() {
        let storage = Arc::new(RecordingStorage::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::builder(storage.clone(), counting_handler(runs.clone(), 0))
            .clock(paused_clock())
            .start();

        let due = Utc::now() - chrono::Duration::seconds(1);
        scheduler
            .schedule(due, Payload::new("email", json!({"to": "x"})))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        scheduler.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(storage.completes(), 1);
        assert!(storage.inner().is_empty().await);
        assert!(storage.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_future_job_waits_for_due_time() {
        let storage = Arc::new(RecordingStorage::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::builder(storage.clone(), counting_handler(runs.clone(), 0))
            .clock(paused_clock())
            .start();

        scheduler
            .schedule_in(Duration::from_secs(3600), Payload::new("later", json!(null)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(200)).await;
        scheduler.shutdown().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_retries_then_succeeds() {
        let storage = Arc::new(RecordingStorage::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::builder(storage.clone(), counting_handler(runs.clone(), 2))
            .clock(paused_clock())
            .start();

        scheduler
            .schedule_in(Duration::ZERO, Payload::new("flaky", json!(null)))
            .await
            .unwrap();
        // Retries after 30s and 45s, each picked up within one poll interval
        tokio::time::sleep(Duration::from_secs(200)).await;
        scheduler.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(storage.retries(), 2);
        assert_eq!(storage.completes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_job_is_forgotten() {
        let storage = Arc::new(RecordingStorage::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let config = SchedulerConfig::default()
            .with_worker_count(2)
            .with_poll_interval(Duration::from_secs(1))
            .with_retry(Duration::from_secs(1), 1.0, 3, Duration::from_secs(1));
        let scheduler = Scheduler::builder(storage.clone(), counting_handler(runs.clone(), usize::MAX))
            .config(config)
            .clock(paused_clock())
            .start();

        let id = scheduler
            .schedule_in(Duration::ZERO, Payload::new("doomed", json!(null)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        scheduler.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(storage.forgets(), 1);
        assert!(storage.inner().get(id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_job_keeps_lease_across_workers() {
        let storage = Arc::new(RecordingStorage::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let handler = move |_cancel: Cancellation, _payload: Payload| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5 * 60)).await;
                Ok::<(), anyhow::Error>(())
            }
        };
        let config = SchedulerConfig::default()
            .with_worker_count(4)
            .with_poll_interval(Duration::from_secs(1));
        let scheduler = Scheduler::builder(storage.clone(), handler)
            .config(config)
            .clock(paused_clock())
            .start();

        scheduler
            .schedule_in(Duration::ZERO, Payload::new("slow", json!(null)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        scheduler.shutdown().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(storage.keeps() >= 50);
        assert_eq!(storage.completes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_running_handler() {
        let storage = Arc::new(RecordingStorage::new());
        let cancelled = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&cancelled);
        let handler = move |cancel: Cancellation, _payload: Payload| {
            let seen = Arc::clone(&seen);
            async move {
                cancel.cancelled().await;
                seen.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("interrupted")
            }
        };
        let scheduler = Scheduler::builder(storage.clone(), handler)
            .clock(paused_clock())
            .start();

        let id = scheduler
            .schedule_in(Duration::ZERO, Payload::new("endless", json!(null)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        scheduler.shutdown().await;

        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        let job = storage.inner().get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Ready);
        assert_eq!(storage.retries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_error_reaches_caller() {
        let storage = Arc::new(RecordingStorage::new());
        storage.fail_schedule(true);
        let scheduler = Scheduler::builder(storage.clone(), ok_handler)
            .clock(paused_clock())
            .start();

        let result = scheduler
            .schedule_in(Duration::ZERO, Payload::new("lost", json!(null)))
            .await;
        scheduler.shutdown().await;

        assert!(result.unwrap_err().is_unavailable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_workers_only_schedule() {
        let storage = Arc::new(RecordingStorage::new());
        let scheduler = Scheduler::builder(storage.clone(), ok_handler)
            .config(SchedulerConfig::default().with_worker_count(0))
            .clock(paused_clock())
            .start();

        scheduler
            .schedule_in(Duration::ZERO, Payload::new("queued", json!(null)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        scheduler.shutdown().await;

        assert_eq!(storage.claims(), 0);
        assert_eq!(storage.inner().len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_typed_job() {
        #[derive(Serialize, Deserialize)]
        struct Invoice {
            number: u32,
        }

        impl JobKind for Invoice {
            const KIND: &'static str = "invoice";
        }

        let numbers = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&numbers);
        let registry = lapse_core::HandlerRegistry::new().register(move |_cancel, invoice: Invoice| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(invoice.number);
                Ok::<(), anyhow::Error>(())
            }
        });
        let storage = Arc::new(RecordingStorage::new());
        let scheduler = Scheduler::builder(storage.clone(), registry)
            .clock(paused_clock())
            .start();

        let due = Utc::now() - chrono::Duration::seconds(1);
        scheduler
            .schedule_job(due, &Invoice { number: 7 })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(20)).await;
        scheduler.shutdown().await;

        assert_eq!(*numbers.lock().unwrap(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_config_is_clamped() {
        let storage = Arc::new(RecordingStorage::new());
        let scheduler = Scheduler::builder(storage, ok_handler)
            .config(SchedulerConfig::default().with_poll_interval(Duration::ZERO))
            .clock(paused_clock())
            .start();

        assert_eq!(scheduler.config().poll_interval, Duration::from_millis(100));
        scheduler.shutdown().await;
    }
}
