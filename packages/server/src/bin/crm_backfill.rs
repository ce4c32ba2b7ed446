//! Operator CLI for CRM sync
//!
//! Runs the same bulk sync, retry and log listing the admin endpoints expose,
//! against the configured database and CRM. Prints one JSON object per line
//! and exits non-zero when a bulk sync cannot finish.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crm_sync::config::Config;
use crm_sync::domains::crm::models::{ActorKind, BackfillFilter};
use crm_sync::domains::crm::{list_logs, retry_log_entry, spawn_bulk_sync, BackfillProgress};
use crm_sync::kernel::ServerDeps;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "crm_backfill")]
#[command(about = "Bulk sync, retry and inspect CRM sync state")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run signup sync for existing practitioners or patients
    Sync {
        #[arg(value_enum)]
        kind: KindArg,
        /// Include actors that already have a CRM contact
        #[arg(long)]
        all: bool,
    },

    /// Replay one audit log entry
    Retry { log_id: Uuid },

    /// Show recent audit log entries
    Logs {
        #[arg(long)]
        failed_only: bool,
        #[arg(long)]
        limit: Option<i64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Practitioner,
    Patient,
}

impl From<KindArg> for ActorKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Practitioner => ActorKind::Practitioner,
            KindArg::Patient => ActorKind::Patient,
        }
    }
}

fn output<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,crm_sync=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let deps = get_deps().await?;

    match cli.command {
        Commands::Sync { kind, all } => {
            let filter = if all {
                BackfillFilter::All
            } else {
                BackfillFilter::Unsynced
            };
            let mut progress = spawn_bulk_sync(deps, kind.into(), filter);
            let mut completed = false;
            while let Some(update) = progress.recv().await {
                output(&update)?;
                match update {
                    BackfillProgress::Aborted { error } => bail!("Bulk sync aborted: {}", error),
                    BackfillProgress::Complete { .. } => completed = true,
                    _ => {}
                }
            }
            if !completed {
                bail!("Bulk sync stopped before completing");
            }
        }
        Commands::Retry { log_id } => {
            let result = retry_log_entry(&deps, log_id)
                .await
                .with_context(|| format!("Retry of log entry {} failed", log_id))?;
            output(&result)?;
        }
        Commands::Logs { failed_only, limit } => {
            for entry in list_logs(&deps, failed_only, limit).await? {
                output(&entry)?;
            }
        }
    }

    Ok(())
}

async fn get_deps() -> Result<ServerDeps> {
    let config = Config::from_env()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    ServerDeps::from_pool(pool, config.crm)
}
