//! Error types for the catalog module.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by catalog storage operations.
///
/// The catalog never retries on its own; callers decide whether a failure
/// aborts the run or is logged and skipped.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open or create the database file.
    #[error("Failed to open catalog at {path}: {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    /// Failed to run a schema migration.
    #[error("Catalog migration failed: {0}")]
    Migration(#[from] rusqlite::Error),

    /// A query failed.
    #[error("Catalog query failed: {0}")]
    Query(String),

    /// A stored payload could not be (de)serialized.
    #[error("Catalog payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    /// Reading or renaming the legacy flat file failed.
    #[error("Legacy catalog file {path}: {source}")]
    Legacy {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The database schema version is newer than supported.
    #[error("Catalog schema version {found} is newer than supported version {expected}")]
    UnsupportedSchemaVersion { found: i32, expected: i32 },

    /// Failed to spawn a blocking task.
    #[error("Failed to spawn blocking task: {0}")]
    Spawn(#[from] tokio::task::JoinError),
}

impl StorageError {
    /// Create a Query error from a rusqlite error.
    pub fn query(source: rusqlite::Error) -> Self {
        Self::Query(source.to_string())
    }
}
