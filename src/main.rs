use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{self, EnvFilter};

use d1_backup::config::Config;
use d1_backup::scheduler::{new_run_id, Scheduler};
use d1_backup::workflow::BackupWorkflow;
use d1_backup_durable::SledStepLog;
use d1_backup_export::{DumpFetcher, ExportClient};
use d1_backup_storage::FsArchiveStore;

#[derive(Parser)]
#[command(name = "d1-backup")]
#[command(about = "Scheduled backups of a hosted SQL database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup now
    Run {
        /// Resume an earlier run instead of starting a new one
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Run backups on a cron schedule until interrupted
    Schedule {
        /// Cron expression overriding the configured one
        #[arg(long)]
        cron: Option<String>,
    },

    /// Delete expired archives without taking a backup
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    // Initialize logging
    let level = cli.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&level));

    if config.log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    info!(version = d1_backup::VERSION, "Starting d1-backup");

    let workflow = Arc::new(build_workflow(&config).await?);

    match cli.command {
        Commands::Run { run_id } => {
            let run_id = run_id.unwrap_or_else(|| new_run_id(Utc::now()));
            info!(run_id = %run_id, database = %config.target(), "Running backup");

            let summary = workflow.run(&run_id, &config.target()).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Schedule { cron } => {
            let expression = cron.unwrap_or_else(|| config.schedule.cron.clone());
            info!("Scheduling backups with `{}`", expression);

            let scheduler = Scheduler::new(&expression, workflow, config.target())?;
            scheduler
                .run_until(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
            info!("Shutting down...");
        }

        Commands::Prune => {
            let report = workflow.prune(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn build_workflow(config: &Config) -> Result<BackupWorkflow> {
    let export = Arc::new(
        ExportClient::new(config.client_config()).context("Failed to build export client")?,
    );
    let dumps = Arc::new(
        DumpFetcher::new(Duration::from_secs(config.api.request_timeout_secs))
            .context("Failed to build dump fetcher")?,
    );

    let store = Arc::new(
        FsArchiveStore::open(&config.bucket.path)
            .await
            .context("Failed to open archive bucket")?,
    );

    let steps = Arc::new(SledStepLog::open(config.step_log_path()).context("Failed to open step log")?);

    Ok(BackupWorkflow::new(export, dumps, store, steps)
        .with_poller(config.poller_config())
        .with_step_policy(config.step_policy())
        .with_retention(config.retention_window()))
}
