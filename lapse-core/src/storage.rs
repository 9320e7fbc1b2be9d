//! Job storage contract
//!
//! Every persistence backend implements [`JobStorage`]. The backend alone is
//! responsible for the claim being atomic: at any instant at most one worker
//! holds a non-expired lease on a job. The scheduler layered on top assumes
//! this and never locks anything itself.
//!
//! All operations may fail with a transient [`StorageError`]. Callers treat
//! such failures as "try again later", never as job loss.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::job::{Job, WorkerId};
use crate::domain::payload::Payload;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or failed the operation
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Payload could not be converted to or from its stored form
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend settings were rejected before any connection was made
    #[error("invalid storage configuration: {0}")]
    Config(String),

    /// Schema creation or migration failed
    #[error("storage install failed: {0}")]
    Install(String),

    /// The backend is closed or cannot be reached
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Wraps any backend-specific error
    pub fn backend(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(error))
    }

    /// Check if the backend settings were rejected
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if this error came from the schema installation step
    pub fn is_install(&self) -> bool {
        matches!(self, Self::Install(_))
    }

    /// Check if the backend is closed or unreachable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Persistence contract for scheduled jobs
///
/// Lease operations take the [`Job`] snapshot returned by [`claim`](Self::claim)
/// and must verify that `worker` still owns it before changing anything.
#[async_trait]
pub trait JobStorage: Send + Sync {
    /// Inserts a new ready job due at `when`
    ///
    /// Either succeeds and returns the new job id, or leaves no partial job.
    async fn schedule(&self, payload: Payload, when: DateTime<Utc>) -> Result<Uuid>;

    /// Atomically claims one due job for `worker` until `until`
    ///
    /// Returns `None` when nothing is due. The claimed job has its attempt
    /// counter incremented and `invisible_until` set to `until`.
    async fn claim(
        &self,
        worker: WorkerId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<Job>>;

    /// Extends the lease of `job` to `until`
    ///
    /// Returns `false` when `worker` no longer owns the job (hijacked).
    async fn keep_claim(&self, worker: WorkerId, job: &Job, until: DateTime<Utc>) -> Result<bool>;

    /// Marks the job as successfully finished
    async fn complete(&self, worker: WorkerId, job: &Job, now: DateTime<Utc>) -> Result<()>;

    /// Returns the job to the ready state, due again at `when`
    async fn retry(&self, worker: WorkerId, job: &Job, when: DateTime<Utc>) -> Result<()>;

    /// Marks the job as terminally failed
    async fn forget(&self, worker: WorkerId, job: &Job, now: DateTime<Utc>) -> Result<()>;

    /// Deletes one batch of terminal jobs finished before `cutoff`
    ///
    /// Returns `true` if a full batch was deleted and more work likely remains.
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<bool>;

    /// Releases backend resources once the scheduler has stopped
    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_helpers() {
        let error = StorageError::backend(std::io::Error::other("connection reset"));
        assert!(!error.is_install());
        assert_eq!(
            error.to_string(),
            "storage backend error: connection reset"
        );

        assert!(StorageError::Install("no permission".into()).is_install());
        assert!(StorageError::Config("empty url".into()).is_config());
        assert!(!StorageError::Config("empty url".into()).is_install());
        assert!(StorageError::Unavailable("closed".into()).is_unavailable());
    }
}
