//! Download engine: a fixed pool of workers drains a shared FIFO of items.
//!
//! Each worker claims one item at a time and fetches its requested formats
//! in order. An item counts as downloaded when at least one format lands on
//! disk; it is then upserted into the catalog right away so an interrupted
//! run never re-downloads it. Failures stay per item and never stop the
//! batch.

pub mod error;
pub mod file;
pub mod paths;

use std::collections::VecDeque;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::item::{Item, KnownIds};
use crate::transport::RetryingTransport;
use crate::types::{FormatSelection, MediaFormat};

pub use error::{DownloadError, FormatError};

/// Subset of application config consumed by the download engine.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub(crate) directory: PathBuf,
    pub(crate) format: FormatSelection,
    pub(crate) concurrency: usize,
    /// Pause before every media request.
    pub(crate) rate_limit: Duration,
    pub(crate) verify_files: bool,
    pub(crate) no_progress_bar: bool,
}

/// Item counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Some formats failed but the item was downloaded.
    Warning,
    /// The item was not downloaded.
    Failure,
}

/// One entry of the run's error log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub item_id: String,
    pub message: String,
    pub severity: Severity,
}

/// Progress and error state mutated by workers, read through snapshots.
#[derive(Debug, Default)]
pub struct RunState {
    progress: Mutex<Progress>,
    errors: Mutex<Vec<ItemError>>,
}

impl RunState {
    pub fn progress(&self) -> Progress {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn errors(&self) -> Vec<ItemError> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&self, f: impl FnOnce(&mut Progress)) {
        f(&mut self.progress.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn push_error(&self, item_id: &str, message: String, severity: Severity) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ItemError {
                item_id: item_id.to_string(),
                message,
                severity,
            });
    }
}

/// What happened to one item.
#[derive(Debug)]
enum ItemOutcome {
    /// No media URL on the item.
    NoMedia,
    /// Verification found every target file already on disk.
    AlreadyOnDisk,
    /// At least one format succeeded; the rest are listed.
    Downloaded { missing: Vec<FormatError> },
    Failed(DownloadError),
}

pub struct Downloader {
    transport: Arc<RetryingTransport>,
    catalog: Arc<dyn Catalog>,
    known: KnownIds,
    bearer: String,
    config: DownloadConfig,
    state: Arc<RunState>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.config)
            .field("progress", &self.state.progress())
            .finish_non_exhaustive()
    }
}

impl Downloader {
    pub fn new(
        transport: Arc<RetryingTransport>,
        catalog: Arc<dyn Catalog>,
        known: KnownIds,
        bearer: impl Into<String>,
        config: DownloadConfig,
    ) -> Self {
        Self {
            transport,
            catalog,
            known,
            bearer: bearer.into(),
            config,
            state: Arc::new(RunState::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop claiming new items once `token` is cancelled. Items already
    /// claimed finish normally.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Record progress into `state` instead of a fresh one, so a caller can
    /// watch the run from outside.
    pub fn with_state(mut self, state: Arc<RunState>) -> Self {
        self.state = state;
        self
    }

    /// Shared handle to the run's progress and errors.
    pub fn state(&self) -> Arc<RunState> {
        Arc::clone(&self.state)
    }

    /// Download every item. Outcomes are observed through [`Self::state`].
    pub async fn run(&self, items: Vec<Item>) {
        let total = items.len() as u64;
        self.state.update(|p| p.total += total);
        if items.is_empty() {
            return;
        }

        let pool_size = self.config.concurrency.clamp(1, items.len());
        let queue = Mutex::new(VecDeque::from(items));
        let pb = create_progress_bar(self.config.no_progress_bar, total);

        tracing::info!(
            "Downloading {} items with {} workers into {}",
            total,
            pool_size,
            self.config.directory.display()
        );

        join_all((0..pool_size).map(|worker| self.worker_loop(worker, &queue, &pb))).await;

        pb.finish_and_clear();
    }

    async fn worker_loop(&self, worker: usize, queue: &Mutex<VecDeque<Item>>, pb: &ProgressBar) {
        loop {
            if self.shutdown.is_cancelled() {
                pb.suspend(|| tracing::info!(worker, "Shutdown requested, worker stopping"));
                break;
            }
            // Guard dropped at end of statement, never held across an await.
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(item) = next else {
                break;
            };

            pb.set_message(item.title().unwrap_or(&item.id).to_string());
            let outcome = self.process_item(&item).await;
            self.record(&item, outcome, pb).await;
            pb.inc(1);
        }
    }

    async fn process_item(&self, item: &Item) -> ItemOutcome {
        let Some(primary_url) = item.media_url() else {
            return ItemOutcome::NoMedia;
        };

        let targets: Vec<(MediaFormat, PathBuf)> = self
            .config
            .format
            .formats()
            .iter()
            .map(|format| {
                (
                    *format,
                    paths::target_path(&self.config.directory, item, *format),
                )
            })
            .collect();

        if self.config.verify_files {
            let target_paths: Vec<PathBuf> = targets.iter().map(|(_, p)| p.clone()).collect();
            if file::all_exist(&target_paths).await {
                return ItemOutcome::AlreadyOnDisk;
            }
        }

        let mut succeeded = 0usize;
        let mut failures = Vec::new();
        for (format, path) in &targets {
            match self.fetch_format(primary_url, *format, path).await {
                Ok(()) => succeeded += 1,
                Err(e) => failures.push(e),
            }
        }

        if succeeded > 0 {
            ItemOutcome::Downloaded { missing: failures }
        } else {
            ItemOutcome::Failed(DownloadError {
                item_id: item.id.clone(),
                failures,
            })
        }
    }

    async fn fetch_format(
        &self,
        primary_url: &str,
        format: MediaFormat,
        path: &std::path::Path,
    ) -> Result<(), FormatError> {
        if !self.config.rate_limit.is_zero() {
            tokio::time::sleep(self.config.rate_limit).await;
        }

        let url = paths::format_url(primary_url, format).ok_or_else(|| FormatError::NoUrl {
            format,
            url: primary_url.to_string(),
        })?;

        let response = self
            .transport
            .request_stream(&url, &self.bearer)
            .await
            .map_err(|source| FormatError::Transport { format, source })?;

        if response.is_client_error() {
            return Err(FormatError::Unavailable {
                format,
                status: response.status,
            });
        }
        if !response.is_success() {
            return Err(FormatError::HttpStatus {
                format,
                status: response.status,
            });
        }

        let size_bytes = file::write_stream(path, format, response.body).await?;

        tracing::debug!(size_bytes, path = %path.display(), "Downloaded");
        Ok(())
    }

    async fn record(&self, item: &Item, outcome: ItemOutcome, pb: &ProgressBar) {
        match outcome {
            ItemOutcome::NoMedia => {
                pb.suspend(|| tracing::debug!(id = %item.id, "No media URL, skipping"));
                self.state.update(|p| p.skipped += 1);
            }
            ItemOutcome::AlreadyOnDisk => {
                pb.suspend(|| tracing::debug!(id = %item.id, "Already on disk, skipping"));
                self.state.update(|p| p.skipped += 1);
                // Files exist but the catalog may have missed them (a prior
                // upsert failure); record them so the next delta excludes them.
                self.persist(item, pb).await;
            }
            ItemOutcome::Downloaded { missing } => {
                for failure in missing {
                    let message = failure.to_string();
                    let format = failure.format();
                    if failure.is_soft() {
                        pb.suspend(|| tracing::info!(id = %item.id, %format, "{}", message));
                    } else {
                        pb.suspend(|| tracing::warn!(id = %item.id, %format, "Partial download: {}", message));
                    }
                    self.state.push_error(&item.id, message, Severity::Warning);
                }
                self.persist(item, pb).await;
                self.state.update(|p| p.downloaded += 1);
            }
            ItemOutcome::Failed(err) => {
                let message = err.to_string();
                pb.suspend(|| tracing::error!("Download failed: {}", message));
                self.state.push_error(&item.id, message, Severity::Failure);
                self.state.update(|p| p.failed += 1);
            }
        }
    }

    /// Upsert a downloaded item and mark its id known. A storage failure is
    /// logged only; the file on disk stays and the next run re-upserts it.
    async fn persist(&self, item: &Item, pb: &ProgressBar) {
        let mut stored = item.clone();
        stored.downloaded_at = Some(Utc::now());
        if let Err(e) = self.catalog.upsert(&stored).await {
            pb.suspend(|| tracing::warn!(id = %item.id, "Failed to record item in catalog: {}", e));
        }
        self.known.insert(item.id.clone());
    }
}

/// Create a progress bar with a consistent template.
///
/// Hidden when the user passed `--no-progress-bar` or stdout is not a TTY.
fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}
