//! trackvault: archive a remote media library into a local per-user catalog.
//!
//! Each sync pages through the remote listing newest-first, stops early once
//! it reaches items already catalogued, and downloads only the delta with a
//! small pool of workers. Every finished item is written to a SQLite catalog
//! immediately, so an interrupted run resumes where it left off.

#![warn(clippy::all)]

mod catalog;
mod cli;
mod config;
mod download;
mod item;
mod jobs;
mod remote;
pub mod retry;
mod shutdown;
mod sync;
mod transport;
mod types;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use catalog::{Catalog, SqliteCatalog};
use cli::Command;
use config::UserPaths;
use download::{RunState, Severity};
use jobs::JobRegistry;
use sync::{SyncEngine, SyncError, SyncReport};
use transport::{HttpTransport, RetryingTransport};

/// How often the job registry is refreshed from live download progress.
const PROGRESS_TICK: Duration = Duration::from_secs(1);

/// Open the catalog for read-only commands, or explain that none exists yet.
async fn open_existing_catalog(paths: &UserPaths) -> anyhow::Result<Option<SqliteCatalog>> {
    if !paths.catalog.exists() {
        println!("No catalog found at {}", paths.catalog.display());
        println!("Run a sync first to create it.");
        return Ok(None);
    }
    Ok(Some(SqliteCatalog::open(&paths.catalog).await?))
}

/// Run the status command.
async fn run_status(args: cli::UserArgs) -> anyhow::Result<()> {
    let paths = UserPaths::from_args(&args);
    let Some(db) = open_existing_catalog(&paths).await? else {
        return Ok(());
    };
    let summary = db.summary().await?;

    println!("Catalog: {}", db.path().display());
    println!("Media:   {}", paths.media.display());
    println!();
    println!("Items: {}", summary.total_items);

    if let Some(run) = &summary.last_run {
        println!();
        println!(
            "Last sync ({}) started:   {}",
            run.mode,
            run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        match &run.completed_at {
            Some(completed) => println!(
                "Last sync completed: {}",
                completed.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => println!("Last sync did not finish"),
        }
        println!("  Listed:     {}", run.stats.items_listed);
        println!("  Downloaded: {}", run.stats.downloaded);
        println!("  Failed:     {}", run.stats.failed);
        println!("  Skipped:    {}", run.stats.skipped);
        if run.stats.aborted {
            println!("  (aborted)");
        }
    }

    Ok(())
}

/// Run the list command.
async fn run_list(args: cli::ListArgs) -> anyhow::Result<()> {
    let paths = UserPaths::from_args(&args.user);
    let Some(db) = open_existing_catalog(&paths).await? else {
        return Ok(());
    };

    let items = db.all().await?;
    let shown = args.limit.unwrap_or(items.len());
    for item in items.iter().take(shown) {
        let created = item
            .created_at
            .map(|dt| dt.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "----------".to_string());
        let marker = if item.downloaded_at.is_some() { ' ' } else { '?' };
        println!(
            "{} {}{}  {}",
            created,
            marker,
            item.id,
            item.title().unwrap_or("(untitled)")
        );
    }
    if shown < items.len() {
        println!("... {} more", items.len() - shown);
    }
    Ok(())
}

fn print_report(report: &SyncReport) {
    println!();
    println!("Sync complete ({}):", report.mode);
    if report.migrated > 0 {
        println!("  Migrated:   {}", report.migrated);
    }
    println!("  Listed:     {}", report.listed);
    println!("  New:        {}", report.candidates);
    println!("  Downloaded: {}", report.downloaded);
    println!("  Failed:     {}", report.failed);
    println!("  Skipped:    {}", report.skipped);
    println!("  Catalog:    {} items", report.total);

    if !report.errors.is_empty() {
        println!();
        for err in &report.errors {
            let label = match err.severity {
                Severity::Warning => "WARN",
                Severity::Failure => "FAIL",
            };
            println!("  {label} {}: {}", err.item_id, err.message);
        }
    }
    if report.interrupted {
        println!();
        println!("Interrupted: remaining items will be picked up by the next sync.");
    }
}

/// Run the sync command.
async fn run_sync(args: cli::SyncArgs, registry: Arc<JobRegistry>) -> anyhow::Result<()> {
    let config = config::Config::from_sync_args(args)?;
    tracing::debug!(?config, "Resolved configuration");
    tracing::info!(concurrency = config.concurrency, "Starting trackvault");

    let shutdown_token = shutdown::install_signal_handler()?;
    let http = HttpTransport::new(config.request_timeout)?;
    let transport = Arc::new(RetryingTransport::new(Arc::new(http), config.retry));
    let engine =
        SyncEngine::new(transport, config.engine_settings()).with_shutdown(shutdown_token);

    registry.create(&config.user)?;
    let state = Arc::new(RunState::default());
    let ticker = {
        let registry = Arc::clone(&registry);
        let state = Arc::clone(&state);
        let user = config.user.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROGRESS_TICK);
            loop {
                interval.tick().await;
                if registry.update(&user, state.progress()).is_err() {
                    break;
                }
            }
        })
    };

    let result = engine
        .run_sync(&config.user, &config.token, &config.options, state)
        .await;
    ticker.abort();

    match result {
        Ok(report) => {
            registry.complete(&config.user, &report)?;
            if let Some(job) = registry.get(&config.user) {
                let elapsed = job.finished_at.unwrap_or(job.started_at) - job.started_at;
                tracing::info!(
                    "Sync for {} finished in {}s",
                    config.user,
                    elapsed.num_seconds()
                );
            }
            print_report(&report);
            if report.failed > 0 {
                anyhow::bail!("{} items failed to download", report.failed);
            }
            Ok(())
        }
        Err(e) => {
            registry.fail(&config.user, e.to_string())?;
            if let SyncError::Listing { total, .. } = &e {
                println!("Catalog still holds {} items.", total);
            }
            Err(e.into())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let registry = Arc::new(JobRegistry::new());
    match cli.command {
        Command::Status(args) => run_status(args).await,
        Command::List(args) => run_list(args).await,
        Command::Sync(args) => run_sync(args, registry).await,
    }
}
