//! Catalog trait and SQLite implementation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::error::StorageError;
use super::schema;
use super::types::{CatalogSummary, SyncMode, SyncRunRecord, SyncRunStats};
use crate::item::Item;

/// Durable per-user store of items keyed by id.
///
/// Object-safe so it can be shared as `Arc<dyn Catalog>` across download
/// workers. Implementations must make `upsert` safe under concurrent calls.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// True iff an item with this id is stored.
    async fn exists(&self, id: &str) -> Result<bool, StorageError>;

    /// Snapshot of every stored id.
    async fn all_ids(&self) -> Result<HashSet<String>, StorageError>;

    /// Insert or merge a single item. Last write wins per id.
    async fn upsert(&self, item: &Item) -> Result<(), StorageError>;

    /// Batched upsert. Returns the number of rows written.
    async fn upsert_many(&self, items: &[Item]) -> Result<usize, StorageError>;

    /// All items, newest `created_at` first, ties broken by id.
    async fn all(&self) -> Result<Vec<Item>, StorageError>;

    async fn count(&self) -> Result<u64, StorageError>;

    /// Start a new sync run and return its ID.
    async fn start_sync_run(&self, mode: SyncMode) -> Result<i64, StorageError>;

    /// Complete a sync run with statistics.
    async fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats)
        -> Result<(), StorageError>;

    /// Item count plus the most recent sync run.
    async fn summary(&self) -> Result<CatalogSummary, StorageError>;
}

/// Merge rule for re-inserted ids: payload and title are replaced by the
/// incoming row; timestamps are only replaced when the incoming row has one.
const UPSERT_SQL: &str = r#"
INSERT INTO items (id, title, payload, created_at, downloaded_at)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(id) DO UPDATE SET
    title = excluded.title,
    payload = excluded.payload,
    created_at = COALESCE(excluded.created_at, items.created_at),
    downloaded_at = COALESCE(excluded.downloaded_at, items.downloaded_at)
"#;

/// SQLite implementation of the catalog.
pub struct SqliteCatalog {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync. The lock
    /// also serializes writers.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCatalog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteCatalog {
    /// Open or create a catalog at the given path.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let path = path.to_path_buf();
        let path_clone = path.clone();

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path_clone).map_err(|e| StorageError::Open {
                path: path_clone.clone(),
                source: e,
            })?;

            conn.pragma_update(None, "journal_mode", "WAL")
                .map_err(StorageError::Migration)?;
            // NORMAL is still crash-safe under WAL; a committed row survives
            // process termination.
            conn.pragma_update(None, "synchronous", "NORMAL")
                .map_err(StorageError::Migration)?;

            schema::migrate(&conn)?;

            Ok::<_, StorageError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Open an in-memory catalog (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Query(e.to_string()))
    }
}

fn to_millis(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(|d| d.timestamp_millis())
}

fn from_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|m| Utc.timestamp_millis_opt(m).single())
}

fn upsert_row(conn: &Connection, item: &Item) -> Result<(), StorageError> {
    let payload = serde_json::to_string(&item.payload)?;
    conn.execute(
        UPSERT_SQL,
        rusqlite::params![
            &item.id,
            item.title(),
            payload,
            to_millis(item.created_at),
            to_millis(item.downloaded_at),
        ],
    )
    .map_err(StorageError::query)?;
    Ok(())
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn exists(&self, id: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM items WHERE id = ?1", [id], |row| row.get(0))
            .optional()
            .map_err(StorageError::query)?;
        Ok(found.is_some())
    }

    async fn all_ids(&self) -> Result<HashSet<String>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id FROM items")
            .map_err(StorageError::query)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StorageError::query)?
            .collect::<Result<HashSet<_>, _>>()
            .map_err(StorageError::query)?;
        Ok(ids)
    }

    async fn upsert(&self, item: &Item) -> Result<(), StorageError> {
        let conn = self.lock()?;
        upsert_row(&conn, item)
    }

    async fn upsert_many(&self, items: &[Item]) -> Result<usize, StorageError> {
        if items.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StorageError::query)?;
        for item in items {
            upsert_row(&tx, item)?;
        }
        tx.commit().map_err(StorageError::query)?;
        Ok(items.len())
    }

    async fn all(&self) -> Result<Vec<Item>, StorageError> {
        let rows: Vec<(String, String, Option<i64>, Option<i64>)> = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, payload, created_at, downloaded_at FROM items ORDER BY created_at DESC, id ASC",
                )
                .map_err(StorageError::query)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })
                .map_err(StorageError::query)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(StorageError::query)?;
            rows
        };

        rows.into_iter()
            .map(|(id, payload, created_at, downloaded_at)| {
                Ok(Item {
                    id,
                    payload: serde_json::from_str(&payload)?,
                    created_at: from_millis(created_at),
                    downloaded_at: from_millis(downloaded_at),
                })
            })
            .collect()
    }

    async fn count(&self) -> Result<u64, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
            .map_err(StorageError::query)?;
        Ok(count as u64)
    }

    async fn start_sync_run(&self, mode: SyncMode) -> Result<i64, StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_runs (started_at, mode) VALUES (?1, ?2)",
            rusqlite::params![Utc::now().timestamp(), mode.as_str()],
        )
        .map_err(StorageError::query)?;
        Ok(conn.last_insert_rowid())
    }

    async fn complete_sync_run(
        &self,
        run_id: i64,
        stats: &SyncRunStats,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, items_listed = ?2, downloaded = ?3, failed = ?4, skipped = ?5, aborted = ?6 WHERE id = ?7",
            rusqlite::params![
                Utc::now().timestamp(),
                stats.items_listed as i64,
                stats.downloaded as i64,
                stats.failed as i64,
                stats.skipped as i64,
                stats.aborted,
                run_id,
            ],
        )
        .map_err(StorageError::query)?;
        Ok(())
    }

    async fn summary(&self) -> Result<CatalogSummary, StorageError> {
        let total_items = self.count().await?;

        let conn = self.lock()?;
        let last_run = conn
            .query_row(
                "SELECT id, started_at, completed_at, mode, items_listed, downloaded, failed, skipped, aborted FROM sync_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    let mode: String = row.get(3)?;
                    Ok(SyncRunRecord {
                        id: row.get(0)?,
                        started_at: Utc
                            .timestamp_opt(row.get(1)?, 0)
                            .single()
                            .unwrap_or_default(),
                        completed_at: row
                            .get::<_, Option<i64>>(2)?
                            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
                        mode: SyncMode::from_str(&mode).unwrap_or(SyncMode::Incremental),
                        stats: SyncRunStats {
                            items_listed: row.get::<_, i64>(4)? as u64,
                            downloaded: row.get::<_, i64>(5)? as u64,
                            failed: row.get::<_, i64>(6)? as u64,
                            skipped: row.get::<_, i64>(7)? as u64,
                            aborted: row.get(8)?,
                        },
                    })
                },
            )
            .optional()
            .map_err(StorageError::query)?;

        Ok(CatalogSummary {
            total_items,
            last_run,
        })
    }
}
