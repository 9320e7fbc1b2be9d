//! Test doubles for the scheduler loops

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lapse_core::storage::Result;
use lapse_core::{
    Cancellation, Job, JobStorage, MemoryJobStorage, MonotonicClock, Payload, SchedulerConfig,
    StorageError, WorkerId,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::context::WorkerContext;

/// In-memory storage that counts calls and can be told to misbehave
#[derive(Default)]
pub struct RecordingStorage {
    inner: MemoryJobStorage,
    fail_schedule: AtomicBool,
    fail_claims: AtomicBool,
    fail_keep_claims: AtomicBool,
    lose_leases: AtomicBool,
    claims: AtomicUsize,
    keeps: AtomicUsize,
    completes: AtomicUsize,
    retries: AtomicUsize,
    forgets: AtomicUsize,
    prunes: Mutex<Vec<DateTime<Utc>>>,
    prune_results: Mutex<VecDeque<Result<bool>>>,
    closed: AtomicBool,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryJobStorage {
        &self.inner
    }

    pub fn fail_schedule(&self, fail: bool) {
        self.fail_schedule.store(fail, Ordering::SeqCst);
    }

    pub fn fail_claims(&self, fail: bool) {
        self.fail_claims.store(fail, Ordering::SeqCst);
    }

    pub fn fail_keep_claims(&self, fail: bool) {
        self.fail_keep_claims.store(fail, Ordering::SeqCst);
    }

    /// Makes every renewal report the lease as taken by someone else
    pub fn lose_leases(&self, lose: bool) {
        self.lose_leases.store(lose, Ordering::SeqCst);
    }

    /// Queues results for upcoming prunes; `Ok(false)` once drained
    pub fn push_prune_results(&self, results: impl IntoIterator<Item = Result<bool>>) {
        self.prune_results.lock().unwrap().extend(results);
    }

    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    pub fn keeps(&self) -> usize {
        self.keeps.load(Ordering::SeqCst)
    }

    pub fn completes(&self) -> usize {
        self.completes.load(Ordering::SeqCst)
    }

    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::SeqCst)
    }

    pub fn forgets(&self) -> usize {
        self.forgets.load(Ordering::SeqCst)
    }

    pub fn prune_cutoffs(&self) -> Vec<DateTime<Utc>> {
        self.prunes.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn injected(what: &str) -> StorageError {
    StorageError::Unavailable(format!("injected {what} failure"))
}

#[async_trait]
impl JobStorage for RecordingStorage {
    async fn schedule(&self, payload: Payload, when: DateTime<Utc>) -> Result<Uuid> {
        if self.fail_schedule.load(Ordering::SeqCst) {
            return Err(injected("schedule"));
        }
        self.inner.schedule(payload, when).await
    }

    async fn claim(
        &self,
        worker: WorkerId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        if self.fail_claims.load(Ordering::SeqCst) {
            return Err(injected("claim"));
        }
        self.inner.claim(worker, now, until).await
    }

    async fn keep_claim(&self, worker: WorkerId, job: &Job, until: DateTime<Utc>) -> Result<bool> {
        self.keeps.fetch_add(1, Ordering::SeqCst);
        if self.fail_keep_claims.load(Ordering::SeqCst) {
            return Err(injected("keep-alive"));
        }
        if self.lose_leases.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.keep_claim(worker, job, until).await
    }

    async fn complete(&self, worker: WorkerId, job: &Job, now: DateTime<Utc>) -> Result<()> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        self.inner.complete(worker, job, now).await
    }

    async fn retry(&self, worker: WorkerId, job: &Job, when: DateTime<Utc>) -> Result<()> {
        self.retries.fetch_add(1, Ordering::SeqCst);
        self.inner.retry(worker, job, when).await
    }

    async fn forget(&self, worker: WorkerId, job: &Job, now: DateTime<Utc>) -> Result<()> {
        self.forgets.fetch_add(1, Ordering::SeqCst);
        self.inner.forget(worker, job, now).await
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<bool> {
        self.prunes.lock().unwrap().push(cutoff);
        self.prune_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(false))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Context over `storage` with a no-op handler and a paused-time clock
pub fn context_with(storage: Arc<RecordingStorage>, config: SchedulerConfig) -> Arc<WorkerContext> {
    let handler = |_cancel: Cancellation, _payload: Payload| async move { Ok::<(), anyhow::Error>(()) };
    WorkerContext::new(
        storage,
        Arc::new(handler),
        Arc::new(MonotonicClock::new()),
        &config,
    )
}
