//! Run command handler
//!
//! Hosts a scheduler whose handler logs each payload, until Ctrl-C.

use anyhow::{Context, Result};
use clap::Args;
use lapse_core::{Cancellation, HandlerRegistry, JobStorage, Payload};
use lapse_postgres::PgJobStorage;
use lapse_scheduler::Scheduler;
use std::sync::Arc;
use tracing::info;

use crate::config::SchedulerArgs;

/// Arguments of `lapse run`
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Only accept these job kinds (comma-separated); others fail and retry
    #[arg(long, env = "LAPSE_KINDS", value_delimiter = ',')]
    pub kinds: Vec<String>,

    #[command(flatten)]
    pub scheduler: SchedulerArgs,
}

/// Start a scheduler and stop it gracefully on Ctrl-C
pub async fn run(storage: PgJobStorage, args: RunArgs) -> Result<()> {
    storage
        .install()
        .await
        .context("Failed to prepare jobs table")?;

    let storage: Arc<dyn JobStorage> = Arc::new(storage);
    let config = args.scheduler.scheduler_config();

    let scheduler = match registry_for(&args.kinds) {
        Some(registry) => {
            let mut kinds: Vec<&str> = registry.kinds().collect();
            kinds.sort_unstable();
            info!("Accepting job kinds: {}", kinds.join(", "));
            Scheduler::start(storage, registry, config)
        }
        None => {
            info!("Accepting all job kinds");
            Scheduler::start(storage, log_payload, config)
        }
    };

    info!("Scheduler running, press Ctrl-C to stop");
    let signal = tokio::signal::ctrl_c().await;

    scheduler.shutdown().await;
    signal.context("Failed to listen for Ctrl-C")
}

/// Registry logging the given kinds; `None` when no kind is named
fn registry_for(kinds: &[String]) -> Option<HandlerRegistry> {
    let registry = kinds
        .iter()
        .map(|kind| kind.trim())
        .filter(|kind| !kind.is_empty())
        .fold(HandlerRegistry::new(), |registry, kind| {
            registry.register_raw(kind, log_payload)
        });

    (!registry.is_empty()).then_some(registry)
}

/// Logs the kind and data of every job
async fn log_payload(_cancel: Cancellation, payload: Payload) -> Result<()> {
    info!(kind = %payload.kind, "Running job: {}", payload.data);
    Ok(())
}
