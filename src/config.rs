use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{SyncArgs, UserArgs};
use crate::download::paths::sanitize_username;
use crate::remote::ListingConfig;
use crate::retry::RetryConfig;
use crate::sync::{EngineSettings, SyncOptions};

const CATALOG_FILE: &str = "catalog.db";
const MEDIA_DIR: &str = "media";
const LEGACY_FILE: &str = "library.json";
const LOCK_FILE: &str = "sync.lock";

/// On-disk layout of one user's archive under the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPaths {
    pub root: PathBuf,
    pub catalog: PathBuf,
    pub media: PathBuf,
    /// Pre-catalog flat file, imported once then renamed.
    pub legacy: PathBuf,
    /// Held exclusively for the duration of a sync.
    pub lock: PathBuf,
}

impl UserPaths {
    pub fn new(data_dir: &Path, user: &str) -> Self {
        let root = data_dir.join(sanitize_username(user));
        Self {
            catalog: root.join(CATALOG_FILE),
            media: root.join(MEDIA_DIR),
            legacy: root.join(LEGACY_FILE),
            lock: root.join(LOCK_FILE),
            root,
        }
    }

    pub fn from_args(args: &UserArgs) -> Self {
        Self::new(&expand_tilde(&args.data_dir), &args.user)
    }
}

/// Resolved configuration for the `sync` command.
pub struct Config {
    pub user: String,
    pub token: String,
    pub listing_url: String,
    pub data_dir: PathBuf,
    pub options: SyncOptions,
    pub listing: ListingConfig,
    pub retry: RetryConfig,
    pub request_timeout: Duration,
    pub concurrency: usize,
    pub no_progress_bar: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .field("listing_url", &self.listing_url)
            .field("data_dir", &self.data_dir)
            .field("options", &self.options)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

pub(crate) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_sync_args(args: SyncArgs) -> anyhow::Result<Self> {
        if args.token.trim().is_empty() {
            anyhow::bail!("An access token is required (--token or TRACKVAULT_TOKEN)");
        }
        if args.listing_url.trim().is_empty() {
            anyhow::bail!("A listing URL is required (--listing-url or TRACKVAULT_LISTING_URL)");
        }
        if args.retry_max_ms < args.retry_base_ms {
            anyhow::bail!(
                "--retry-max-ms ({}) must not be below --retry-base-ms ({})",
                args.retry_max_ms,
                args.retry_base_ms
            );
        }

        Ok(Self {
            data_dir: expand_tilde(&args.user.data_dir),
            user: args.user.user,
            token: args.token,
            listing_url: args.listing_url,
            options: SyncOptions {
                limit: args.limit,
                rate_limit_ms: args.rate_limit_ms,
                format: args.format,
                full_sync: args.full_sync,
                verify_files: args.verify_files,
            },
            listing: ListingConfig {
                page_size: args.page_size as usize,
                early_stop_pages: args.early_stop_pages,
                page_delay: Duration::from_millis(args.page_delay_ms),
            },
            retry: RetryConfig {
                max_retries: args.max_retries,
                base_delay_ms: args.retry_base_ms,
                max_delay_ms: args.retry_max_ms,
            },
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            concurrency: usize::from(args.concurrency),
            no_progress_bar: args.no_progress_bar,
        })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            listing_url: self.listing_url.clone(),
            data_dir: self.data_dir.clone(),
            listing: self.listing,
            concurrency: self.concurrency,
            no_progress_bar: self.no_progress_bar,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FormatSelection;

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Music");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Music"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(
            expand_tilde("/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            expand_tilde("relative/path"),
            PathBuf::from("relative/path")
        );
    }

    #[test]
    fn test_user_paths_layout() {
        let paths = UserPaths::new(Path::new("/data"), "alice@example.com");
        assert_eq!(paths.root, PathBuf::from("/data/alice_example.com"));
        assert_eq!(paths.catalog, PathBuf::from("/data/alice_example.com/catalog.db"));
        assert_eq!(paths.media, PathBuf::from("/data/alice_example.com/media"));
        assert_eq!(paths.legacy, PathBuf::from("/data/alice_example.com/library.json"));
        assert_eq!(paths.lock, PathBuf::from("/data/alice_example.com/sync.lock"));
    }

    fn sync_args(overrides: impl FnOnce(&mut SyncArgs)) -> SyncArgs {
        use clap::Parser;
        let cli = crate::cli::Cli::try_parse_from([
            "trackvault",
            "sync",
            "-u",
            "alice",
            "--token",
            "secret",
            "--listing-url",
            "https://api.test/feed",
            "--data-dir",
            "/tmp/tv",
        ])
        .unwrap();
        let crate::cli::Command::Sync(mut args) = cli.command else {
            panic!("expected sync");
        };
        overrides(&mut args);
        args
    }

    #[test]
    fn test_from_sync_args_maps_tunables() {
        let cfg = Config::from_sync_args(sync_args(|a| {
            a.page_size = 50;
            a.early_stop_pages = 4;
            a.format = FormatSelection::Both;
            a.limit = Some(7);
        }))
        .unwrap();
        assert_eq!(cfg.listing.page_size, 50);
        assert_eq!(cfg.listing.early_stop_pages, 4);
        assert_eq!(cfg.listing.page_delay, Duration::from_millis(1000));
        assert_eq!(cfg.options.format, FormatSelection::Both);
        assert_eq!(cfg.options.limit, Some(7));
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.concurrency, 3);
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/tv"));
    }

    #[test]
    fn test_blank_token_rejected() {
        assert!(Config::from_sync_args(sync_args(|a| a.token = "  ".into())).is_err());
    }

    #[test]
    fn test_retry_cap_below_base_rejected() {
        let result = Config::from_sync_args(sync_args(|a| {
            a.retry_base_ms = 5_000;
            a.retry_max_ms = 1_000;
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let cfg = Config::from_sync_args(sync_args(|_| {})).unwrap();
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("secret"));
        assert!(shown.contains("<redacted>"));
    }
}
