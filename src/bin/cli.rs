//! listing-sync CLI
//!
//! Local execution entry point for sync runs.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use listing_sync::{
    config,
    error::{AppError, Result},
    models::Config,
    pipeline::{self, ArtifactStore, EnrichmentProgress, RunOptions, RunOutcome, SyncPipeline},
    services::{HttpDestinationClient, HttpSourceConnector, TitleBlocklist},
    storage::{CheckpointStore, LocalStorage},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// listing-sync - Facility Listing Crawl/Diff/Sync
#[derive(Parser, Debug)]
#[command(
    name = "listing-sync",
    version,
    about = "Incremental crawl-diff-sync for facility listings"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl, enrich and diff against the destination
    Run {
        /// Resume an interrupted run
        #[arg(long, value_name = "RUN_ID")]
        resume: Option<String>,

        /// Refetch the destination snapshot even if the cache is fresh
        #[arg(long)]
        refresh_snapshot: bool,
    },

    /// Show the checkpoint of a run, or list runs
    Status {
        #[arg(long, value_name = "RUN_ID")]
        run: Option<String>,
    },

    /// Push a finished run's batches to the destination
    Publish {
        #[arg(long, value_name = "RUN_ID")]
        run: String,

        /// Log what would be sent without sending it
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate configuration
    Validate,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Cancel `token` on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; finishing in-flight work and saving checkpoint");
            token.cancel();
        }
    });
}

/// Log every tenth completed enrichment, and every failure.
fn spawn_progress_logger() -> mpsc::UnboundedSender<EnrichmentProgress> {
    let (tx, mut rx) = mpsc::unbounded_channel::<EnrichmentProgress>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if !event.success {
                log::warn!(
                    "[{}/{}] enrichment failed: {}",
                    event.completed,
                    event.total,
                    event.source_url
                );
            } else if event.completed % 10 == 0 || event.completed == event.total {
                log::info!("[{}/{}] enriched", event.completed, event.total);
            }
        }
    });
    tx
}

async fn run(config: Arc<Config>, resume: Option<String>, refresh_snapshot: bool) -> Result<()> {
    let source = Arc::new(HttpSourceConnector::connect(&config).await?);
    let destination = Arc::new(HttpDestinationClient::new(&config)?);
    let moderation = Arc::new(TitleBlocklist::new(&config.moderation)?);
    let pipeline = SyncPipeline::new(Arc::clone(&config), source, destination, moderation)?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let options = RunOptions {
        resume,
        refresh_snapshot,
        run_id: None,
    };
    match pipeline
        .run(options, &cancel, Some(spawn_progress_logger()))
        .await?
    {
        RunOutcome::Completed(summary) => {
            log::info!(
                "Artifacts written to {}",
                config.paths.output_dir.join(&summary.run_id).display()
            );
        }
        RunOutcome::Cancelled { run_id } => {
            log::warn!("Run {run_id} cancelled. Resume with: listing-sync run --resume {run_id}");
        }
    }
    Ok(())
}

async fn status(config: &Config, run_id: Option<&str>) -> Result<()> {
    let storage = LocalStorage::new(&config.paths.output_dir);
    let Some(run_id) = run_id else {
        let runs = storage.list_dirs().await?;
        if runs.is_empty() {
            log::info!("No runs in {}", config.paths.output_dir.display());
        }
        for run in runs {
            log::info!("{run}");
        }
        return Ok(());
    };

    let checkpoints = CheckpointStore::new(storage);
    let Some(checkpoint) = checkpoints.load(run_id).await? else {
        return Err(AppError::validation(format!("No checkpoint for run {run_id}")));
    };

    log::info!("Run: {}", checkpoint.run_id);
    log::info!(
        "Status: {}",
        if checkpoint.is_complete() { "complete" } else { "in progress" }
    );
    log::info!(
        "Completed partitions: {}",
        checkpoint
            .partitions_completed
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
    log::info!(
        "Remaining partitions: {}",
        checkpoint.partitions_remaining.join(", ")
    );
    Ok(())
}

async fn publish(config: &Config, run_id: &str, dry_run: bool) -> Result<()> {
    let artifacts = ArtifactStore::new(LocalStorage::new(&config.paths.output_dir));
    let destination = Arc::new(HttpDestinationClient::new(config)?);
    let report = pipeline::publish_run(config, &artifacts, destination, run_id, dry_run).await?;
    if report.failed > 0 {
        return Err(AppError::destination(format!(
            "{} record(s) failed to publish",
            report.failed
        )));
    }
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = config::load_config(&cli.config);
    log::debug!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Validate => {
            log::info!("Validating configuration...");
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "✓ Config OK ({} partitions, {} type mappings, {} blocklist patterns)",
                config.source.partitions.len(),
                config.canonical.mappings.len(),
                config.moderation.blocklist_patterns.len()
            );
        }

        Command::Run {
            resume,
            refresh_snapshot,
        } => {
            config.validate()?;
            run(Arc::new(config), resume, refresh_snapshot).await?;
        }

        Command::Status { run } => status(&config, run.as_deref()).await?,

        Command::Publish { run, dry_run } => {
            config.validate()?;
            publish(&config, &run, dry_run).await?;
        }
    }

    Ok(())
}
