use lapse_core::StorageError;
use sqlx::{PgPool, postgres::PgPoolOptions};

use crate::config::PgStorageConfig;

/// Serializes concurrent installs across processes
const INSTALL_LOCK_KEY: i64 = 0x6c61_7073_6500;

pub async fn create_pool(config: &PgStorageConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.connection_string)
        .await
}

/// Creates the schema, jobs table and claim index if missing
///
/// Runs in one transaction under an advisory lock, so several processes
/// starting together do not race on `CREATE ... IF NOT EXISTS`.
pub async fn run_migrations(pool: &PgPool, config: &PgStorageConfig) -> Result<(), StorageError> {
    install(pool, config).await.map_err(|e| match e {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => storage_error(e),
        other => StorageError::Install(other.to_string()),
    })?;

    tracing::info!(
        "Database migrations completed successfully ({})",
        config.table_name()
    );
    Ok(())
}

/// Maps a driver error onto the storage error taxonomy
pub fn storage_error(error: sqlx::Error) -> StorageError {
    match error {
        sqlx::Error::PoolClosed => StorageError::Unavailable("connection pool closed".to_string()),
        sqlx::Error::PoolTimedOut => {
            StorageError::Unavailable("timed out waiting for a connection".to_string())
        }
        other => StorageError::backend(other),
    }
}

async fn install(pool: &PgPool, config: &PgStorageConfig) -> Result<(), sqlx::Error> {
    let table = config.table_name();
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(INSTALL_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    if let Some(schema) = &config.schema {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
            .execute(&mut *tx)
            .await?;
    }

    // Create jobs table
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            job_id UUID PRIMARY KEY,
            kind TEXT NOT NULL,
            payload JSONB NOT NULL,
            scheduled_for TIMESTAMPTZ NOT NULL,
            invisible_until TIMESTAMPTZ NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 0,
            claimed_by UUID,
            status TEXT NOT NULL DEFAULT 'ready'
        )
        "#,
        table
    ))
    .execute(&mut *tx)
    .await?;

    // Claims and prunes both filter on status, then order by visibility
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS lapse_jobs_claim_idx ON {} (status, invisible_until, scheduled_for)",
        table
    ))
    .execute(&mut *tx)
    .await?;

    tx.commit().await
}
