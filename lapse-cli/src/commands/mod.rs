//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod install;
mod run;
mod schedule;

pub use run::RunArgs;
pub use schedule::ScheduleArgs;

use anyhow::{Context, Result};
use clap::Subcommand;
use lapse_postgres::{PgJobStorage, PgStorageConfig};

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create the jobs table and exit
    Install,
    /// Enqueue one job
    Schedule(ScheduleArgs),
    /// Run a scheduler until Ctrl-C
    Run(RunArgs),
}

/// Handle a CLI command
///
/// Connects to Postgres, then routes the command to its handler.
///
/// # Arguments
/// * `command` - The command to execute
/// * `storage_config` - Validated Postgres settings
pub async fn handle_command(command: Commands, storage_config: PgStorageConfig) -> Result<()> {
    let table = storage_config.table_name();
    let storage = PgJobStorage::connect(storage_config)
        .await
        .with_context(|| format!("Failed to connect to Postgres for {}", table))?;

    match command {
        Commands::Install => install::install(&storage, &table).await,
        Commands::Schedule(args) => schedule::schedule(&storage, args).await,
        Commands::Run(args) => run::run(storage, args).await,
    }
}
