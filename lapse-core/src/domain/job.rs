//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::payload::Payload;

/// Scheduled unit of work
///
/// Structure shared between storage backends (persist) and pollers (execute).
/// Backends hand out a snapshot at claim time; later lease operations identify
/// the job by `id` and verify ownership through `claimed_by`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload: Payload,
    pub scheduled_for: DateTime<Utc>,
    /// Not claimable before this instant. Equals `scheduled_for` until the first
    /// claim, then tracks the lease expiry or the next retry time.
    pub invisible_until: DateTime<Utc>,
    /// Number of claims so far; the first claim yields 1.
    pub attempt: u32,
    pub claimed_by: Option<WorkerId>,
    pub status: JobStatus,
}

impl Job {
    /// Creates a freshly scheduled job
    pub fn new(payload: Payload, when: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            scheduled_for: when,
            invisible_until: when,
            attempt: 0,
            claimed_by: None,
            status: JobStatus::Ready,
        }
    }

    /// Whether a claim at `now` may pick this job up
    ///
    /// Claimed jobs become eligible again once their lease has expired.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, JobStatus::Ready | JobStatus::Claimed) && self.invisible_until <= now
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ready,
    Claimed,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Claimed => "claimed",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs are only kept around until pruned
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(JobStatus::Ready),
            "claimed" => Ok(JobStatus::Claimed),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Lease owner token
///
/// Generated once per poller and never reused across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for WorkerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_job_is_ready_and_unclaimed() {
        let when = Utc::now();
        let job = Job::new(Payload::new("noop", serde_json::Value::Null), when);

        assert_eq!(job.status, JobStatus::Ready);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.invisible_until, job.scheduled_for);
        assert!(job.claimed_by.is_none());
    }

    #[test]
    fn test_claimable_respects_due_time() {
        let now = Utc::now();
        let job = Job::new(Payload::new("noop", serde_json::Value::Null), now);

        assert!(job.is_claimable(now));
        assert!(!job.is_claimable(now - Duration::seconds(1)));
    }

    #[test]
    fn test_expired_lease_is_claimable_again() {
        let now = Utc::now();
        let mut job = Job::new(Payload::new("noop", serde_json::Value::Null), now);
        job.status = JobStatus::Claimed;
        job.claimed_by = Some(WorkerId::new());
        job.invisible_until = now + Duration::minutes(1);

        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(now + Duration::minutes(2)));
    }

    #[test]
    fn test_terminal_jobs_are_never_claimable() {
        let now = Utc::now();
        let mut job = Job::new(Payload::new("noop", serde_json::Value::Null), now);
        job.status = JobStatus::Completed;

        assert!(!job.is_claimable(now + Duration::days(1)));
        assert!(job.status.is_terminal());
    }

    #[test]
    fn test_status_string_conversion() {
        for status in [
            JobStatus::Ready,
            JobStatus::Claimed,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("running".parse::<JobStatus>().is_err());
    }
}
