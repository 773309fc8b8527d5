//! One-time import of the pre-catalog flat file.
//!
//! Older archives kept their state as a single JSON array next to the media
//! directory. On the first run after upgrade the array is merged into the
//! catalog and the file is renamed so later runs skip it. A file that is
//! not a JSON array is set aside as `.invalid` so it cannot block every
//! later sync.

use std::path::{Path, PathBuf};

use serde_json::Value;

use super::db::Catalog;
use super::error::StorageError;
use crate::item::Item;

/// Result of a legacy migration attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub migrated_count: usize,
}

/// Where the legacy file is moved once imported.
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, ".migrated")
}

/// Where an unparseable legacy file is moved.
pub fn invalid_path(path: &Path) -> PathBuf {
    with_suffix(path, ".invalid")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Import `path` into `catalog` if it exists. Absence is not an error, and
/// neither is malformed JSON: that file is renamed aside with a warning.
pub async fn migrate_legacy(
    catalog: &dyn Catalog,
    path: &Path,
) -> Result<MigrationOutcome, StorageError> {
    let legacy_err = |source| StorageError::Legacy {
        path: path.to_path_buf(),
        source,
    };

    if !tokio::fs::try_exists(path).await.map_err(legacy_err)? {
        return Ok(MigrationOutcome::default());
    }

    let raw = tokio::fs::read(path).await.map_err(legacy_err)?;
    let records: Vec<Value> = match serde_json::from_slice(&raw) {
        Ok(records) => records,
        Err(e) => {
            let invalid = invalid_path(path);
            tokio::fs::rename(path, &invalid).await.map_err(legacy_err)?;
            tracing::warn!(
                "Legacy file {} is not a JSON array ({}), moved to {} and skipped",
                path.display(),
                e,
                invalid.display()
            );
            return Ok(MigrationOutcome::default());
        }
    };
    let total = records.len();
    let items: Vec<Item> = records.into_iter().filter_map(legacy_record_to_item).collect();
    if items.len() < total {
        tracing::warn!(
            "Ignored {} legacy records without an id in {}",
            total - items.len(),
            path.display()
        );
    }

    let migrated_count = catalog.upsert_many(&items).await?;

    let backup = backup_path(path);
    tokio::fs::rename(path, &backup).await.map_err(legacy_err)?;
    tracing::info!(
        "Migrated {} legacy items into the catalog, backup at {}",
        migrated_count,
        backup.display()
    );

    Ok(MigrationOutcome { migrated_count })
}

/// Accepts both serialized `Item`s (with a nested `payload`) and bare
/// listing records.
fn legacy_record_to_item(record: Value) -> Option<Item> {
    if record.get("payload").is_some_and(Value::is_object) {
        return serde_json::from_value::<Item>(record)
            .ok()
            .filter(|item| !item.id.is_empty());
    }
    let downloaded_at = ["downloaded_at", "downloadedAt"]
        .iter()
        .filter_map(|key| record.get(*key).and_then(Value::as_str))
        .find_map(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc));
    let mut item = Item::from_record(record)?;
    item.downloaded_at = downloaded_at;
    Some(item)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let db = SqliteCatalog::open_in_memory().unwrap();

        let outcome = migrate_legacy(&db, &dir.path().join("library.json"))
            .await
            .unwrap();
        assert_eq!(outcome.migrated_count, 0);
        assert_eq!(db.count().await.unwrap(), 0);
        assert!(db.summary().await.unwrap().last_run.is_none());
    }

    #[tokio::test]
    async fn test_imports_and_renames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        let records = json!([
            {"id": "a", "title": "A", "created_at": "2024-05-01T00:00:00Z",
             "downloadedAt": "2024-05-02T00:00:00Z"},
            {"id": "b", "payload": {"id": "b", "title": "B"}, "created_at": null},
            {"title": "no id"}
        ]);
        std::fs::write(&path, records.to_string()).unwrap();

        let db = SqliteCatalog::open_in_memory().unwrap();
        let outcome = migrate_legacy(&db, &path).await.unwrap();

        assert_eq!(outcome.migrated_count, 2);
        assert!(db.exists("a").await.unwrap());
        assert!(db.exists("b").await.unwrap());
        assert!(!path.exists());
        assert!(backup_path(&path).exists());

        let a = db.all().await.unwrap().into_iter().find(|i| i.id == "a").unwrap();
        assert!(a.downloaded_at.is_some());

        // Second run finds nothing left to migrate.
        let again = migrate_legacy(&db, &path).await.unwrap();
        assert_eq!(again.migrated_count, 0);
    }

    #[tokio::test]
    async fn test_malformed_file_is_set_aside_and_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        std::fs::write(&path, b"{not json").unwrap();

        let db = SqliteCatalog::open_in_memory().unwrap();
        let outcome = migrate_legacy(&db, &path).await.unwrap();

        assert_eq!(outcome.migrated_count, 0);
        assert!(!path.exists());
        assert_eq!(std::fs::read(invalid_path(&path)).unwrap(), b"{not json");
        assert!(!backup_path(&path).exists());
        assert_eq!(db.count().await.unwrap(), 0);

        let again = migrate_legacy(&db, &path).await.unwrap();
        assert_eq!(again.migrated_count, 0);
    }

    #[test]
    fn test_set_aside_paths_append_suffix() {
        assert_eq!(
            backup_path(Path::new("/data/u/library.json")),
            PathBuf::from("/data/u/library.json.migrated")
        );
        assert_eq!(
            invalid_path(Path::new("/data/u/library.json")),
            PathBuf::from("/data/u/library.json.invalid")
        );
    }
}
