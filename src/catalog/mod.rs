//! Per-user persistent catalog of archived items.
//!
//! SQLite-backed store keyed by item id. It answers "what do we already
//! have" for delta computation and receives an upsert after every
//! successful download, so an interrupted run resumes from the right place.

pub mod db;
pub mod error;
pub mod legacy;
pub mod schema;
pub mod types;

pub use db::{Catalog, SqliteCatalog};
pub use error::StorageError;
pub use legacy::{migrate_legacy, MigrationOutcome};
pub use types::{CatalogSummary, SyncMode, SyncRunStats};
