//! Sync orchestration: legacy import, listing, delta, download, report.
//!
//! A run moves `idle -> running -> completed | failed`. Only a listing
//! failure aborts the run; per-item download failures are aggregated into
//! the report. Whatever was downloaded before an abort stays in the catalog
//! and the next run's delta resumes from there.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs4::fs_std::FileExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::catalog::{
    migrate_legacy, Catalog, SqliteCatalog, StorageError, SyncMode, SyncRunStats,
};
use crate::config::UserPaths;
use crate::download::{DownloadConfig, Downloader, ItemError, RunState};
use crate::item::{Item, KnownIds};
use crate::remote::{ListOptions, ListingConfig, ListingError, RemoteLister};
use crate::transport::RetryingTransport;
use crate::types::FormatSelection;

/// Per-run options supplied by the caller.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Cap on both the listing walk and the number of items downloaded.
    pub limit: Option<usize>,
    pub rate_limit_ms: u64,
    pub format: FormatSelection,
    pub full_sync: bool,
    pub verify_files: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            limit: None,
            rate_limit_ms: 500,
            format: FormatSelection::Primary,
            full_sync: false,
            verify_files: false,
        }
    }
}

/// Engine-wide settings that do not change between runs.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub listing_url: String,
    pub data_dir: PathBuf,
    pub listing: ListingConfig,
    pub concurrency: usize,
    pub no_progress_bar: bool,
}

/// Aggregate result of a completed run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub mode: SyncMode,
    /// Legacy records imported before listing.
    pub migrated: usize,
    /// Items returned by the listing walk.
    pub listed: usize,
    /// Items handed to the downloader after delta and limit.
    pub candidates: usize,
    pub downloaded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Catalog size once the run finished.
    pub total: u64,
    pub errors: Vec<ItemError>,
    /// A shutdown signal stopped workers before the queue drained.
    pub interrupted: bool,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cannot create {path}: {source}")]
    Provision {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("another sync for this user is already running (lock held on {path})")]
    AlreadyRunning { path: PathBuf },

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The listing could not be completed, so no delta was computed.
    /// `total` is the catalog size at abort time.
    #[error("listing failed, run aborted: {source}")]
    Listing {
        #[source]
        source: ListingError,
        total: u64,
    },
}

/// Exclusive lock on a user's directory, released on drop.
#[derive(Debug)]
pub struct SyncLock {
    _file: std::fs::File,
}

impl SyncLock {
    pub async fn acquire(path: &Path) -> Result<Self, SyncError> {
        let lock_path = path.to_path_buf();
        let file = tokio::task::spawn_blocking(move || -> Result<std::fs::File, SyncError> {
            let file =
                std::fs::File::create(&lock_path).map_err(|source| SyncError::Provision {
                    path: lock_path.clone(),
                    source,
                })?;
            file.try_lock_exclusive()
                .map_err(|_| SyncError::AlreadyRunning { path: lock_path })?;
            Ok(file)
        })
        .await
        .map_err(|e| SyncError::Provision {
            path: path.to_path_buf(),
            source: std::io::Error::other(e),
        })??;
        Ok(Self { _file: file })
    }
}

pub struct SyncEngine {
    transport: Arc<RetryingTransport>,
    settings: EngineSettings,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(transport: Arc<RetryingTransport>, settings: EngineSettings) -> Self {
        Self {
            transport,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Run one sync for `user`. `credential` is sent as the bearer token on
    /// every request. Download counters accumulate in `state`, which the
    /// caller may poll while the run is in flight.
    ///
    /// A run holds the user's lock file throughout, so a second run for the
    /// same user fails with [`SyncError::AlreadyRunning`].
    pub async fn run_sync(
        &self,
        user: &str,
        credential: &str,
        options: &SyncOptions,
        state: Arc<RunState>,
    ) -> Result<SyncReport, SyncError> {
        let paths = UserPaths::new(&self.settings.data_dir, user);
        tokio::fs::create_dir_all(&paths.media)
            .await
            .map_err(|source| SyncError::Provision {
                path: paths.media.clone(),
                source,
            })?;
        let _lock = SyncLock::acquire(&paths.lock).await?;

        let catalog: Arc<dyn Catalog> = Arc::new(SqliteCatalog::open(&paths.catalog).await?);
        let migrated = migrate_legacy(catalog.as_ref(), &paths.legacy)
            .await?
            .migrated_count;

        let known_ids = catalog.all_ids().await?;
        let mode = if options.full_sync || known_ids.is_empty() {
            SyncMode::Full
        } else {
            SyncMode::Incremental
        };
        tracing::info!(
            "Starting {} sync for {} ({} items already catalogued)",
            mode,
            user,
            known_ids.len()
        );
        let known = KnownIds::new(known_ids);
        let run_id = catalog.start_sync_run(mode).await?;

        let lister = RemoteLister::new(
            Arc::clone(&self.transport),
            self.settings.listing_url.clone(),
            credential,
            self.settings.listing,
        );
        let list_options = ListOptions {
            limit: options.limit,
            full_sync: mode == SyncMode::Full,
        };
        let listing = match lister.fetch_all(&known, list_options).await {
            Ok(listing) => listing,
            Err(source) => {
                let aborted = SyncRunStats {
                    aborted: true,
                    ..SyncRunStats::default()
                };
                if let Err(e) = catalog.complete_sync_run(run_id, &aborted).await {
                    tracing::warn!("Failed to record aborted sync run: {}", e);
                }
                let total = catalog.count().await?;
                return Err(SyncError::Listing { source, total });
            }
        };

        let listed = listing.items.len();
        let (pages, stop) = (listing.pages_fetched, listing.stop);
        let mut delta = compute_delta(listing.items, &known);
        if let Some(limit) = options.limit {
            delta.truncate(limit);
        }
        let candidates = delta.len();
        tracing::info!(
            pages,
            ?stop,
            "{} items listed, {} not yet archived",
            listed,
            candidates
        );

        let downloader = Downloader::new(
            Arc::clone(&self.transport),
            Arc::clone(&catalog),
            known,
            credential,
            DownloadConfig {
                directory: paths.media.clone(),
                format: options.format,
                concurrency: self.settings.concurrency,
                rate_limit: Duration::from_millis(options.rate_limit_ms),
                verify_files: options.verify_files,
                no_progress_bar: self.settings.no_progress_bar,
            },
        )
        .with_state(state)
        .with_shutdown(self.shutdown.clone());
        downloader.run(delta).await;

        let state = downloader.state();
        let progress = state.progress();
        let interrupted = self.shutdown.is_cancelled();
        let stats = SyncRunStats {
            items_listed: listed as u64,
            downloaded: progress.downloaded,
            failed: progress.failed,
            skipped: progress.skipped,
            aborted: interrupted,
        };
        if let Err(e) = catalog.complete_sync_run(run_id, &stats).await {
            tracing::warn!("Failed to record sync run: {}", e);
        }

        Ok(SyncReport {
            mode,
            migrated,
            listed,
            candidates,
            downloaded: progress.downloaded,
            failed: progress.failed,
            skipped: progress.skipped,
            total: catalog.count().await?,
            errors: state.errors(),
            interrupted,
        })
    }
}

/// Remote items whose ids are not known, in listing order. An id listed
/// twice (the listing shifted between page fetches) is kept once.
pub fn compute_delta(remote: Vec<Item>, known: &KnownIds) -> Vec<Item> {
    let mut seen = HashSet::new();
    remote
        .into_iter()
        .filter(|item| !known.contains(&item.id) && seen.insert(item.id.clone()))
        .collect()
}
