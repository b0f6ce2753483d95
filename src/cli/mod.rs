//! Command-line interface for dayline.
//!
//! Provides commands for running the pipeline, inspecting batch status,
//! reading the card timeline and the call ledger, and retrying failed
//! batches.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::categories::CategoryCatalog;
use crate::config::Config;
use crate::credentials::SecretStore;
use crate::domain::day_key_for;
use crate::ingest::{IngestConfig, SegmentWatcher};
use crate::pipeline::Scheduler;
use crate::providers::{Provider, ProviderBackend};
use crate::store::{Database, InstanceLock};

/// dayline - activity timeline analysis pipeline
#[derive(Parser, Debug)]
#[command(name = "dayline")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the config file (default: $DAYLINE_HOME/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline until interrupted
    Run,

    /// Show batch status counts
    Status,

    /// Show activity cards for a day or time range
    Cards {
        /// Logical day key (YYYY-MM-DD); default: today
        #[arg(short, long)]
        day: Option<String>,

        /// Range start (RFC 3339), used with --to instead of --day
        #[arg(long)]
        from: Option<String>,

        /// Range end (RFC 3339)
        #[arg(long)]
        to: Option<String>,
    },

    /// Show recent provider call attempts
    Calls {
        /// Maximum number of attempts to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Reset a failed batch to pending for reprocessing
    Retry {
        /// Batch ID (UUID)
        batch_id: String,
    },

    /// Show the resolved configuration
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;

        match self.command {
            Commands::Run => run_pipeline(config).await,
            Commands::Status => show_status(config).await,
            Commands::Cards { day, from, to } => show_cards(config, day, from, to).await,
            Commands::Calls { limit } => show_calls(config, limit).await,
            Commands::Retry { batch_id } => retry_batch(config, &batch_id).await,
            Commands::Config => {
                println!("{config:#?}");
                Ok(())
            }
        }
    }
}

async fn run_pipeline(config: Config) -> Result<()> {
    let _lock = InstanceLock::acquire(&config.home)?;
    let db = Database::open(config.db_path())?;

    std::fs::create_dir_all(config.recordings_dir()).with_context(|| {
        format!(
            "failed to create recordings directory {}",
            config.recordings_dir().display()
        )
    })?;

    let secrets = SecretStore::new(&config.home);
    let provider: Arc<dyn Provider> =
        Arc::new(ProviderBackend::from_config(&config.provider, secrets));
    let catalog = Arc::new(CategoryCatalog::new(config.categories.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let watcher = SegmentWatcher::new(db.clone(), IngestConfig::from_config(&config));
    match watcher.scan_once().await {
        Ok(result) => info!(registered = result.registered, "startup catch-up scan done"),
        Err(err) => warn!(error = %err, "startup scan failed"),
    }

    let watcher_shutdown = shutdown_rx.clone();
    let watcher_handle = tokio::spawn(async move { watcher.watch(watcher_shutdown).await });

    let scheduler = Scheduler::new(db, config, provider, catalog);
    let scheduler_shutdown = shutdown_rx;
    let scheduler_handle = tokio::spawn(async move { scheduler.run(scheduler_shutdown).await });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let _ = watcher_handle.await;
    let _ = scheduler_handle.await;

    Ok(())
}

async fn show_status(config: Config) -> Result<()> {
    let db = Database::open(config.db_path())?;
    let counts = db.batch_status_counts().await?;

    println!("Batches:");
    println!("  pending:    {}", counts.pending);
    println!("  processing: {}", counts.processing);
    println!("  completed:  {}", counts.completed);
    println!("  failed:     {}", counts.failed);

    Ok(())
}

async fn show_cards(
    config: Config,
    day: Option<String>,
    from: Option<String>,
    to: Option<String>,
) -> Result<()> {
    let db = Database::open(config.db_path())?;

    let cards = match (from, to) {
        (Some(from), Some(to)) => {
            let start = chrono::DateTime::parse_from_rfc3339(&from)
                .context("invalid --from timestamp")?
                .with_timezone(&chrono::Utc);
            let end = chrono::DateTime::parse_from_rfc3339(&to)
                .context("invalid --to timestamp")?
                .with_timezone(&chrono::Utc);
            db.cards_in_range(start, end).await?
        }
        _ => {
            let day_key = day.unwrap_or_else(|| {
                day_key_for(chrono::Utc::now(), config.consolidation.day_start_hour)
            });
            db.cards_for_day(&day_key).await?
        }
    };

    if cards.is_empty() {
        println!("No cards.");
        return Ok(());
    }

    for card in cards {
        println!(
            "{} .. {}  [{}] {}",
            card.start_ts.format("%H:%M"),
            card.end_ts.format("%H:%M"),
            card.category,
            card.title,
        );
        println!("    {}", card.summary);
        for interruption in &card.interruptions {
            println!(
                "    ~ {} .. {}  {}",
                interruption.start_ts.format("%H:%M"),
                interruption.end_ts.format("%H:%M"),
                interruption.title,
            );
        }
    }

    Ok(())
}

async fn show_calls(config: Config, limit: u32) -> Result<()> {
    let db = Database::open(config.db_path())?;
    let records = db.recent_call_records(limit).await?;

    if records.is_empty() {
        println!("No provider calls recorded.");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {:<10} {:<10} attempt {}  {:>6}ms  {}{}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.provider,
            record.operation.as_str(),
            record.attempt,
            record.latency_ms,
            record.status.as_str(),
            record
                .error
                .map(|e| format!("  ({e})"))
                .unwrap_or_default(),
        );
    }

    Ok(())
}

async fn retry_batch(config: Config, batch_id: &str) -> Result<()> {
    let id = Uuid::parse_str(batch_id).context("invalid batch ID")?;
    let db = Database::open(config.db_path())?;

    if db.reset_failed_batch(id, chrono::Utc::now()).await? {
        println!("Batch {id} reset to pending.");
    } else {
        println!("Batch {id} is not in a failed state.");
    }

    Ok(())
}
