//! In-memory job storage
//!
//! Keeps jobs in a map plus an ordered index of `(invisible_until, id)` so a
//! claim is a single lookup of the first entry. Finished jobs are removed
//! immediately, so pruning has nothing to do. State is lost with the process;
//! intended for development, tests and single-process embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::domain::job::{Job, JobStatus, WorkerId};
use crate::domain::payload::Payload;
use crate::storage::{JobStorage, Result};

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, Job>,
    queue: BTreeSet<(DateTime<Utc>, Uuid)>,
}

impl State {
    /// Moves a job to a new position in the claim queue
    fn requeue(&mut self, id: Uuid, from: DateTime<Utc>, to: DateTime<Utc>) {
        self.queue.remove(&(from, id));
        self.queue.insert((to, id));
    }

    /// Returns the job if `worker` currently holds it
    fn owned_mut(&mut self, worker: WorkerId, id: Uuid) -> Option<&mut Job> {
        self.jobs
            .get_mut(&id)
            .filter(|job| job.status == JobStatus::Claimed && job.claimed_by == Some(worker))
    }

    fn remove_owned(&mut self, worker: WorkerId, id: Uuid) -> bool {
        let Some(due) = self.owned_mut(worker, id).map(|job| job.invisible_until) else {
            return false;
        };
        self.jobs.remove(&id);
        self.queue.remove(&(due, id));
        true
    }
}

/// Process-local [`JobStorage`]
#[derive(Default)]
pub struct MemoryJobStorage {
    state: Mutex<State>,
}

impl MemoryJobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs not yet completed or forgotten
    pub async fn len(&self) -> usize {
        self.state.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of a pending job
    pub async fn get(&self, id: Uuid) -> Option<Job> {
        self.state.lock().await.jobs.get(&id).cloned()
    }
}

#[async_trait]
impl JobStorage for MemoryJobStorage {
    async fn schedule(&self, payload: Payload, when: DateTime<Utc>) -> Result<Uuid> {
        let job = Job::new(payload, when);
        let id = job.id;

        let mut state = self.state.lock().await;
        state.queue.insert((when, id));
        state.jobs.insert(id, job);

        Ok(id)
    }

    async fn claim(
        &self,
        worker: WorkerId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;

        let Some(&(due, id)) = state.queue.first() else {
            return Ok(None);
        };
        if due > now {
            return Ok(None);
        }

        state.requeue(id, due, until);
        let Some(job) = state.jobs.get_mut(&id) else {
            state.queue.remove(&(until, id));
            return Ok(None);
        };
        job.status = JobStatus::Claimed;
        job.claimed_by = Some(worker);
        job.invisible_until = until;
        job.attempt += 1;

        debug!(job_id = %id, worker_id = %worker, attempt = job.attempt, "Claimed job");
        Ok(Some(job.clone()))
    }

    async fn keep_claim(&self, worker: WorkerId, job: &Job, until: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock().await;

        let Some(held) = state.owned_mut(worker, job.id) else {
            return Ok(false);
        };
        let previous = std::mem::replace(&mut held.invisible_until, until);
        state.requeue(job.id, previous, until);

        Ok(true)
    }

    async fn complete(&self, worker: WorkerId, job: &Job, _now: DateTime<Utc>) -> Result<()> {
        if !self.state.lock().await.remove_owned(worker, job.id) {
            debug!(job_id = %job.id, worker_id = %worker, "Ignoring completion of job not held");
        }
        Ok(())
    }

    async fn retry(&self, worker: WorkerId, job: &Job, when: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;

        let Some(held) = state.owned_mut(worker, job.id) else {
            debug!(job_id = %job.id, worker_id = %worker, "Ignoring retry of job not held");
            return Ok(());
        };
        let previous = std::mem::replace(&mut held.invisible_until, when);
        held.status = JobStatus::Ready;
        held.claimed_by = None;
        state.requeue(job.id, previous, when);

        Ok(())
    }

    async fn forget(&self, worker: WorkerId, job: &Job, _now: DateTime<Utc>) -> Result<()> {
        if !self.state.lock().await.remove_owned(worker, job.id) {
            debug!(job_id = %job.id, worker_id = %worker, "Ignoring failure of job not held");
        }
        Ok(())
    }

    async fn prune(&self, _cutoff: DateTime<Utc>) -> Result<bool> {
        Ok(false)
    }
}
