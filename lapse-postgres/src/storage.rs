//! Postgres job storage
//!
//! Implements the storage contract on a single table. Claims pick the first
//! due row with `FOR UPDATE SKIP LOCKED`, so concurrent workers never receive
//! the same job and never block on each other. Every lease operation filters
//! on `claimed_by`, which makes operations of a worker that lost its lease
//! no-ops. The table is created lazily on first use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lapse_core::storage::Result;
use lapse_core::{Job, JobStatus, JobStorage, Payload, StorageError, WorkerId};
use sqlx::PgPool;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PgStorageConfig;
use crate::db::{self, storage_error as from_sqlx};

/// [`JobStorage`] backed by a Postgres table
pub struct PgJobStorage {
    pool: PgPool,
    config: PgStorageConfig,
    queries: Queries,
    installed: OnceCell<()>,
}

impl PgJobStorage {
    /// Connects a new pool and wraps it
    pub async fn connect(config: PgStorageConfig) -> Result<Self> {
        config.validate()?;
        let pool = db::create_pool(&config).await.map_err(from_sqlx)?;
        Self::with_pool(pool, config)
    }

    /// Wraps an existing pool
    pub fn with_pool(pool: PgPool, config: PgStorageConfig) -> Result<Self> {
        config.validate()?;
        let queries = Queries::new(&config.table_name());
        Ok(Self {
            pool,
            config,
            queries,
            installed: OnceCell::new(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the jobs table if needed
    ///
    /// Runs at most once per storage; concurrent callers wait for the first.
    /// A failed install is attempted again by the next caller.
    pub async fn install(&self) -> Result<()> {
        self.installed
            .get_or_try_init(|| db::run_migrations(&self.pool, &self.config))
            .await?;
        Ok(())
    }

    async fn ready(&self) -> Result<&PgPool> {
        self.install().await?;
        Ok(&self.pool)
    }

    /// Updates a row held by `worker`, returning whether it matched
    async fn update_held(
        &self,
        query: &str,
        worker: WorkerId,
        job: &Job,
        time: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(query)
            .bind(job.id)
            .bind(worker.as_uuid())
            .bind(time)
            .execute(self.ready().await?)
            .await
            .map_err(from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl JobStorage for PgJobStorage {
    async fn schedule(&self, payload: Payload, when: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(&self.queries.schedule)
            .bind(id)
            .bind(&payload.kind)
            .bind(&payload.data)
            .bind(when)
            .execute(self.ready().await?)
            .await
            .map_err(from_sqlx)?;

        Ok(id)
    }

    async fn claim(
        &self,
        worker: WorkerId,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>(&self.queries.claim)
            .bind(worker.as_uuid())
            .bind(until)
            .bind(now)
            .fetch_optional(self.ready().await?)
            .await
            .map_err(from_sqlx)?;

        Ok(row.map(Job::from))
    }

    async fn keep_claim(&self, worker: WorkerId, job: &Job, until: DateTime<Utc>) -> Result<bool> {
        self.update_held(&self.queries.keep, worker, job, until).await
    }

    async fn complete(&self, worker: WorkerId, job: &Job, now: DateTime<Utc>) -> Result<()> {
        if !self.update_held(&self.queries.complete, worker, job, now).await? {
            debug!(job_id = %job.id, worker_id = %worker, "Ignoring completion of job not held");
        }
        Ok(())
    }

    async fn retry(&self, worker: WorkerId, job: &Job, when: DateTime<Utc>) -> Result<()> {
        if !self.update_held(&self.queries.retry, worker, job, when).await? {
            debug!(job_id = %job.id, worker_id = %worker, "Ignoring retry of job not held");
        }
        Ok(())
    }

    async fn forget(&self, worker: WorkerId, job: &Job, now: DateTime<Utc>) -> Result<()> {
        if !self.update_held(&self.queries.forget, worker, job, now).await? {
            debug!(job_id = %job.id, worker_id = %worker, "Ignoring failure of job not held");
        }
        Ok(())
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<bool> {
        let batch = i64::from(self.config.prune_batch);
        let result = sqlx::query(&self.queries.prune)
            .bind(cutoff)
            .bind(batch)
            .execute(self.ready().await?)
            .await
            .map_err(from_sqlx)?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!("Pruned {} finished job(s)", deleted);
        }
        Ok(deleted >= self.config.prune_batch as u64)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

// =============================================================================
// Queries
// =============================================================================

/// SQL text with the table name spliced in once
struct Queries {
    schedule: String,
    claim: String,
    keep: String,
    complete: String,
    retry: String,
    forget: String,
    prune: String,
}

impl Queries {
    fn new(table: &str) -> Self {
        Self {
            schedule: format!(
                r#"
                INSERT INTO {table} (job_id, kind, payload, scheduled_for, invisible_until, attempt, status)
                VALUES ($1, $2, $3, $4, $4, 0, 'ready')
                "#
            ),
            claim: format!(
                r#"
                UPDATE {table}
                SET status = 'claimed', claimed_by = $1, invisible_until = $2, attempt = attempt + 1
                WHERE job_id = (
                    SELECT job_id FROM {table}
                    WHERE status IN ('ready', 'claimed') AND invisible_until <= $3
                    ORDER BY invisible_until, scheduled_for
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING job_id, kind, payload, scheduled_for, invisible_until, attempt, claimed_by, status
                "#
            ),
            keep: format!(
                r#"
                UPDATE {table} SET invisible_until = $3
                WHERE job_id = $1 AND claimed_by = $2 AND status = 'claimed'
                "#
            ),
            complete: format!(
                r#"
                UPDATE {table} SET status = 'completed', invisible_until = $3
                WHERE job_id = $1 AND claimed_by = $2 AND status = 'claimed'
                "#
            ),
            retry: format!(
                r#"
                UPDATE {table} SET status = 'ready', claimed_by = NULL, invisible_until = $3
                WHERE job_id = $1 AND claimed_by = $2 AND status = 'claimed'
                "#
            ),
            forget: format!(
                r#"
                UPDATE {table} SET status = 'failed', invisible_until = $3
                WHERE job_id = $1 AND claimed_by = $2 AND status = 'claimed'
                "#
            ),
            prune: format!(
                r#"
                DELETE FROM {table}
                WHERE job_id IN (
                    SELECT job_id FROM {table}
                    WHERE status IN ('completed', 'failed') AND invisible_until < $1
                    LIMIT $2
                    FOR UPDATE SKIP LOCKED
                )
                "#
            ),
        }
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: Uuid,
    kind: String,
    payload: serde_json::Value,
    scheduled_for: DateTime<Utc>,
    invisible_until: DateTime<Utc>,
    attempt: i32,
    claimed_by: Option<Uuid>,
    status: String,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        let status = row.status.parse().unwrap_or_else(|e| {
            warn!(job_id = %row.job_id, "{}, treating as claimed", e);
            JobStatus::Claimed
        });

        Job {
            id: row.job_id,
            payload: Payload::new(row.kind, row.payload),
            scheduled_for: row.scheduled_for,
            invisible_until: row.invisible_until,
            attempt: u32::try_from(row.attempt).unwrap_or_default(),
            claimed_by: row.claimed_by.map(WorkerId::from),
            status,
        }
    }
}
