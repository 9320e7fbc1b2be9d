//! Install command handler

use anyhow::{Context, Result};
use colored::*;
use lapse_core::JobStorage;
use lapse_postgres::PgJobStorage;

/// Run the migration and close the pool
pub async fn install(storage: &PgJobStorage, table: &str) -> Result<()> {
    let result = storage
        .install()
        .await
        .with_context(|| format!("Failed to install {}", table));
    storage.close().await;
    result?;

    println!("{} {}", "Installed".green().bold(), table.cyan());
    Ok(())
}
