//! Storage conformance suite
//!
//! Behavioural checks every [`JobStorage`] backend must pass. Each check
//! receives a fresh, empty storage and panics on violation, so backends run
//! the suite from their own tests:
//!
//! ```ignore
//! #[tokio::test]
//! async fn test_conformance() {
//!     lapse_core::conformance::run_all(|| async { Arc::new(MyStorage::connect().await) }).await;
//! }
//! ```
//!
//! Timestamps are truncated to microseconds so backends storing that
//! precision compare equal.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use crate::domain::job::{JobStatus, WorkerId};
use crate::domain::payload::Payload;
use crate::storage::JobStorage;

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn lease(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(1)
}

/// Runs every check, each against a storage from `factory`
pub async fn run_all<S, F, Fut>(factory: F)
where
    S: JobStorage + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = Arc<S>>,
{
    empty_storage_has_nothing_to_claim(&*factory().await).await;
    due_job_is_claimed(&*factory().await).await;
    future_job_is_not_claimed(&*factory().await).await;
    live_lease_hides_job(&*factory().await).await;
    expired_lease_is_reclaimable(&*factory().await).await;
    owner_keeps_claim(&*factory().await).await;
    other_worker_cannot_keep_claim(&*factory().await).await;
    hijacked_owner_cannot_finalize(&*factory().await).await;
    completed_job_is_not_claimed_again(&*factory().await).await;
    retried_job_is_claimed_with_next_attempt(&*factory().await).await;
    forgotten_job_is_not_claimed_again(&*factory().await).await;
    prune_removes_finished_jobs(&*factory().await).await;
    prune_keeps_pending_jobs(&*factory().await).await;
    prune_drains_large_backlog(&*factory().await).await;
    concurrent_claims_are_exclusive(factory().await).await;
}

pub async fn empty_storage_has_nothing_to_claim(storage: &dyn JobStorage) {
    let now = now();
    let job = storage.claim(WorkerId::new(), now, lease(now)).await.unwrap();
    assert!(job.is_none());
}

pub async fn due_job_is_claimed(storage: &dyn JobStorage) {
    let now = now();
    let worker = WorkerId::new();
    let payload = Payload::new("greet", json!({"name": "X"}));

    let id = storage
        .schedule(payload.clone(), now - Duration::seconds(1))
        .await
        .unwrap();
    let job = storage
        .claim(worker, now, lease(now))
        .await
        .unwrap()
        .expect("due job should be claimed");

    assert_eq!(job.id, id);
    assert_eq!(job.payload, payload);
    assert_eq!(job.attempt, 1);
    assert_eq!(job.status, JobStatus::Claimed);
    assert_eq!(job.claimed_by, Some(worker));
    assert_eq!(job.invisible_until, lease(now));
    assert_eq!(job.scheduled_for, now - Duration::seconds(1));
}

pub async fn future_job_is_not_claimed(storage: &dyn JobStorage) {
    let now = now();
    storage
        .schedule(Payload::new("later", json!(null)), now + Duration::days(1))
        .await
        .unwrap();

    let job = storage.claim(WorkerId::new(), now, lease(now)).await.unwrap();
    assert!(job.is_none());
}

pub async fn live_lease_hides_job(storage: &dyn JobStorage) {
    let now = now();
    storage
        .schedule(Payload::new("once", json!(null)), now)
        .await
        .unwrap();

    let first = storage.claim(WorkerId::new(), now, lease(now)).await.unwrap();
    let second = storage.claim(WorkerId::new(), now, lease(now)).await.unwrap();

    assert!(first.is_some());
    assert!(second.is_none());
}

pub async fn expired_lease_is_reclaimable(storage: &dyn JobStorage) {
    let now = now();
    storage
        .schedule(Payload::new("crash", json!(null)), now)
        .await
        .unwrap();

    let first = storage
        .claim(WorkerId::new(), now, lease(now))
        .await
        .unwrap()
        .unwrap();
    let later = lease(now) + Duration::seconds(1);
    let second = storage
        .claim(WorkerId::new(), later, lease(later))
        .await
        .unwrap()
        .expect("expired lease should be reclaimable");

    assert_eq!(second.id, first.id);
    assert_eq!(second.attempt, 2);
}

pub async fn owner_keeps_claim(storage: &dyn JobStorage) {
    let now = now();
    let worker = WorkerId::new();
    storage
        .schedule(Payload::new("long", json!(null)), now)
        .await
        .unwrap();

    let job = storage.claim(worker, now, lease(now)).await.unwrap().unwrap();
    let extended = now + Duration::minutes(5);
    assert!(storage.keep_claim(worker, &job, extended).await.unwrap());

    // Past the original lease, but within the extension
    let probe = lease(now) + Duration::seconds(1);
    let stolen = storage.claim(WorkerId::new(), probe, lease(probe)).await.unwrap();
    assert!(stolen.is_none());
}

pub async fn other_worker_cannot_keep_claim(storage: &dyn JobStorage) {
    let now = now();
    storage
        .schedule(Payload::new("long", json!(null)), now)
        .await
        .unwrap();

    let job = storage
        .claim(WorkerId::new(), now, lease(now))
        .await
        .unwrap()
        .unwrap();

    assert!(!storage.keep_claim(WorkerId::new(), &job, lease(now)).await.unwrap());
}

pub async fn hijacked_owner_cannot_finalize(storage: &dyn JobStorage) {
    let now = now();
    let original = WorkerId::new();
    let thief = WorkerId::new();
    storage
        .schedule(Payload::new("contested", json!(null)), now)
        .await
        .unwrap();

    let stale = storage.claim(original, now, lease(now)).await.unwrap().unwrap();
    let later = lease(now) + Duration::seconds(1);
    let current = storage.claim(thief, later, lease(later)).await.unwrap().unwrap();

    assert!(!storage.keep_claim(original, &stale, lease(later)).await.unwrap());
    storage.complete(original, &stale, later).await.unwrap();
    storage.forget(original, &stale, later).await.unwrap();

    assert!(storage.keep_claim(thief, &current, lease(later)).await.unwrap());
}

pub async fn completed_job_is_not_claimed_again(storage: &dyn JobStorage) {
    let now = now();
    let worker = WorkerId::new();
    storage
        .schedule(Payload::new("done", json!(null)), now)
        .await
        .unwrap();

    let job = storage.claim(worker, now, lease(now)).await.unwrap().unwrap();
    storage.complete(worker, &job, now).await.unwrap();

    let far = now + Duration::days(1);
    assert!(storage.claim(worker, far, lease(far)).await.unwrap().is_none());
}

pub async fn retried_job_is_claimed_with_next_attempt(storage: &dyn JobStorage) {
    let now = now();
    let worker = WorkerId::new();
    let payload = Payload::new("flaky", json!({"n": 1}));
    storage.schedule(payload.clone(), now).await.unwrap();

    let job = storage.claim(worker, now, lease(now)).await.unwrap().unwrap();
    let when = now + Duration::seconds(10);
    storage.retry(worker, &job, when).await.unwrap();

    assert!(storage.claim(worker, now, lease(now)).await.unwrap().is_none());

    let retried = storage
        .claim(worker, when, lease(when))
        .await
        .unwrap()
        .expect("retried job should be claimable once due");
    assert_eq!(retried.id, job.id);
    assert_eq!(retried.attempt, 2);
    assert_eq!(retried.payload, payload);
}

pub async fn forgotten_job_is_not_claimed_again(storage: &dyn JobStorage) {
    let now = now();
    let worker = WorkerId::new();
    storage
        .schedule(Payload::new("X", json!("X")), now - Duration::seconds(1))
        .await
        .unwrap();

    let job = storage.claim(worker, now, lease(now)).await.unwrap().unwrap();
    assert_eq!(job.attempt, 1);
    storage.forget(worker, &job, now).await.unwrap();

    let far = now + Duration::days(1);
    assert!(storage.claim(worker, far, lease(far)).await.unwrap().is_none());
}

pub async fn prune_removes_finished_jobs(storage: &dyn JobStorage) {
    let now = now();
    let worker = WorkerId::new();
    for kind in ["ok", "failed"] {
        storage
            .schedule(Payload::new(kind, json!(null)), now)
            .await
            .unwrap();
    }

    let first = storage.claim(worker, now, lease(now)).await.unwrap().unwrap();
    storage.complete(worker, &first, now).await.unwrap();
    let second = storage.claim(worker, now, lease(now)).await.unwrap().unwrap();
    storage.forget(worker, &second, now).await.unwrap();

    let cutoff = now + Duration::seconds(1);
    assert!(!storage.prune(cutoff).await.unwrap());
    assert!(!storage.prune(cutoff).await.unwrap());
}

pub async fn prune_keeps_pending_jobs(storage: &dyn JobStorage) {
    let now = now();
    let worker = WorkerId::new();
    storage
        .schedule(Payload::new("pending", json!(null)), now - Duration::days(30))
        .await
        .unwrap();

    storage.prune(now + Duration::days(1)).await.unwrap();

    assert!(storage.claim(worker, now, lease(now)).await.unwrap().is_some());
}

pub async fn prune_drains_large_backlog(storage: &dyn JobStorage) {
    let now = now();
    let worker = WorkerId::new();
    let total = 250;

    for n in 0..total {
        storage
            .schedule(Payload::new("bulk", json!(n)), now)
            .await
            .unwrap();
    }
    for _ in 0..total {
        let job = storage.claim(worker, now, lease(now)).await.unwrap().unwrap();
        storage.complete(worker, &job, now).await.unwrap();
    }

    let cutoff = now + Duration::seconds(1);
    let mut rounds = 0;
    while storage.prune(cutoff).await.unwrap() {
        rounds += 1;
        assert!(rounds <= total, "prune kept reporting more work");
    }
    assert!(!storage.prune(cutoff).await.unwrap());
}

pub async fn concurrent_claims_are_exclusive<S: JobStorage + 'static>(storage: Arc<S>) {
    let now = now();
    let total = 40;
    for n in 0..total {
        storage
            .schedule(Payload::new("race", json!(n)), now)
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let storage = Arc::clone(&storage);
        tasks.push(tokio::spawn(async move {
            let worker = WorkerId::new();
            let mut claimed = Vec::new();
            while let Some(job) = storage.claim(worker, now, lease(now)).await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id), "job {id} claimed twice");
        }
    }
    assert_eq!(seen.len(), total);
}
