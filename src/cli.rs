use clap::{Args, Parser, Subcommand};

use crate::types::{FormatSelection, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "trackvault",
    version,
    about = "Archive a remote media library into a local catalog"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch new items from the remote library and download them
    Sync(SyncArgs),

    /// Show catalog size and the last sync run
    Status(UserArgs),

    /// Print catalogued items, newest first
    List(ListArgs),
}

/// Selects whose archive to operate on.
#[derive(Args, Debug, Clone)]
pub struct UserArgs {
    /// Account whose library is archived
    #[arg(short = 'u', long)]
    pub user: String,

    /// Root directory holding per-user archives
    #[arg(long, env = "TRACKVAULT_DATA_DIR", default_value = "~/.trackvault")]
    pub data_dir: String,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub user: UserArgs,

    /// Bearer token sent with every request.
    /// Prefer the TRACKVAULT_TOKEN environment variable over the flag,
    /// which is visible in process listings.
    #[arg(long, env = "TRACKVAULT_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Remote listing endpoint; `page=N` is appended per page
    #[arg(long, env = "TRACKVAULT_LISTING_URL")]
    pub listing_url: String,

    /// Stop after this many items
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    pub limit: Option<usize>,

    /// Delay before each media request, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub rate_limit_ms: u64,

    /// Formats to download
    #[arg(long, value_enum, default_value = "primary")]
    pub format: FormatSelection,

    /// Walk the whole listing instead of stopping at known items
    #[arg(long)]
    pub full_sync: bool,

    /// Skip items whose files already exist on disk
    #[arg(long)]
    pub verify_files: bool,

    /// Number of concurrent download workers
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: u16,

    /// Items per listing page
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..))]
    pub page_size: u32,

    /// Consecutive fully-known pages before an incremental sync stops (0 disables)
    #[arg(long, default_value_t = 2)]
    pub early_stop_pages: u32,

    /// Delay between listing pages, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub page_delay_ms: u64,

    /// Retries after a connection failure
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// First retry delay in milliseconds, doubled per attempt
    #[arg(long, default_value_t = 1000)]
    pub retry_base_ms: u64,

    /// Upper bound on a single retry delay, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub retry_max_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub request_timeout_secs: u64,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[command(flatten)]
    pub user: UserArgs,

    /// Print at most this many items
    #[arg(long)]
    pub limit: Option<usize>,
}
