//! Schedule command handler

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use colored::*;
use lapse_core::{JobStorage, Payload};
use lapse_postgres::PgJobStorage;
use serde_json::Value as JsonValue;

/// Arguments of `lapse schedule`
#[derive(Debug, Args)]
pub struct ScheduleArgs {
    /// Payload kind, matched by the handler
    #[arg(short, long)]
    pub kind: String,

    /// Payload data as JSON
    #[arg(short, long, default_value = "null")]
    pub data: String,

    /// Run after this many seconds
    #[arg(long, conflicts_with = "at")]
    pub delay: Option<u64>,

    /// Run at this RFC 3339 instant (e.g., 2030-01-01T09:00:00Z)
    #[arg(long)]
    pub at: Option<DateTime<Utc>>,
}

/// Enqueue one job and print its id
pub async fn schedule(storage: &PgJobStorage, args: ScheduleArgs) -> Result<()> {
    let payload = build_payload(&args.kind, &args.data)?;
    let when = resolve_when(Utc::now(), args.delay, args.at);

    let result = storage.schedule(payload, when).await;
    storage.close().await;
    let id = result.context("Failed to schedule job")?;

    println!("{}", "Job scheduled successfully!".green().bold());
    println!("  {}: {}", "ID".bold(), id.to_string().cyan());
    println!("  {}: {}", "Kind".bold(), args.kind);
    println!("  {}: {}", "Runs at".bold(), when.to_rfc3339());

    Ok(())
}

fn build_payload(kind: &str, data: &str) -> Result<Payload> {
    if kind.trim().is_empty() {
        bail!("Job kind cannot be empty");
    }

    let data: JsonValue =
        serde_json::from_str(data).with_context(|| format!("Invalid JSON data: {}", data))?;
    Ok(Payload::new(kind, data))
}

/// Due time from a delay or an absolute instant; now when neither is given
fn resolve_when(now: DateTime<Utc>, delay: Option<u64>, at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match (delay, at) {
        (_, Some(at)) => at,
        (Some(secs), None) => i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
        (None, None) => now,
    }
}
