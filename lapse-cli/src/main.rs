//! Lapse CLI
//!
//! Command-line host for the Lapse scheduler on Postgres: installs the jobs
//! table, enqueues jobs and runs a scheduler instance until Ctrl-C.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::DatabaseArgs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lapse")]
#[command(about = "Lapse delayed-job scheduler", long_about = None)]
struct Cli {
    #[command(flatten)]
    database: DatabaseArgs,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "lapse=info,lapse_scheduler=info,lapse_postgres=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let storage_config = cli.database.storage_config()?;

    handle_command(cli.command, storage_config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_schedule_command() {
        let cli = Cli::try_parse_from([
            "lapse",
            "--database-url",
            "postgres://localhost/lapse",
            "schedule",
            "--kind",
            "email",
            "--data",
            r#"{"to":"ops@example.com"}"#,
            "--delay",
            "90",
        ])
        .unwrap();

        assert_eq!(cli.database.database_url, "postgres://localhost/lapse");
        match cli.command {
            Commands::Schedule(args) => {
                assert_eq!(args.kind, "email");
                assert_eq!(args.delay, Some(90));
                assert!(args.at.is_none());
            }
            _ => panic!("expected schedule command"),
        }
    }

    #[test]
    fn test_parse_run_kinds() {
        let cli = Cli::try_parse_from(["lapse", "run", "--kinds", "email,report", "--worker-count", "2"])
            .unwrap();

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.kinds, vec!["email".to_string(), "report".to_string()]);
                assert_eq!(args.scheduler.worker_count, 2);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_delay_conflicts_with_at() {
        let result = Cli::try_parse_from([
            "lapse",
            "schedule",
            "--kind",
            "email",
            "--delay",
            "5",
            "--at",
            "2030-01-01T00:00:00Z",
        ]);
        assert!(result.is_err());
    }
}
