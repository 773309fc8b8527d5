//! The archivable unit: one entry of the remote library plus its metadata.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload keys that may hold the primary media URL, in priority order.
const MEDIA_URL_KEYS: &[&str] = &["audio_url", "media_url", "url"];

/// One entry of the remote library.
///
/// `payload` is stored verbatim as received from the listing API. `id` is
/// the primary key and never changes once an item has been catalogued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            payload,
            created_at: None,
            downloaded_at: None,
        }
    }

    /// Build an item from a raw listing record.
    ///
    /// Returns `None` when the record has no string `id`.
    pub fn from_record(record: Value) -> Option<Self> {
        let id = record.get("id")?.as_str()?.to_string();
        if id.is_empty() {
            return None;
        }
        let created_at = ["created_at", "createdAt"]
            .iter()
            .filter_map(|key| record.get(*key).and_then(Value::as_str))
            .find_map(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Some(Self {
            created_at,
            ..Self::new(id, record)
        })
    }

    /// Display title, if the payload carries a non-empty one.
    pub fn title(&self) -> Option<&str> {
        self.payload
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// URL of the primary rendition, if any.
    pub fn media_url(&self) -> Option<&str> {
        MEDIA_URL_KEYS
            .iter()
            .filter_map(|key| self.payload.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|url| !url.is_empty())
    }
}

/// Ids already archived, shared between the lister and download workers.
///
/// Append-only during a run. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct KnownIds(Arc<RwLock<HashSet<String>>>);

impl KnownIds {
    pub fn new(ids: HashSet<String>) -> Self {
        Self(Arc::new(RwLock::new(ids)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// Returns true if the id was not yet known.
    pub fn insert(&self, id: impl Into<String>) -> bool {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.0.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_record_reads_id_and_created_at() {
        let item = Item::from_record(json!({
            "id": "abc",
            "title": "Song",
            "created_at": "2025-03-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(item.id, "abc");
        assert_eq!(item.created_at.unwrap().to_rfc3339(), "2025-03-01T12:00:00+00:00");
        assert_eq!(item.payload["title"], "Song");
    }

    #[test]
    fn test_from_record_accepts_camel_case_timestamp() {
        let item = Item::from_record(json!({"id": "x", "createdAt": "2024-01-02T03:04:05Z"})).unwrap();
        assert!(item.created_at.is_some());
    }

    #[test]
    fn test_from_record_without_id() {
        assert!(Item::from_record(json!({"title": "no id"})).is_none());
        assert!(Item::from_record(json!({"id": 42})).is_none());
        assert!(Item::from_record(json!({"id": ""})).is_none());
    }

    #[test]
    fn test_unparseable_created_at_is_ignored() {
        let item = Item::from_record(json!({"id": "x", "created_at": "yesterday"})).unwrap();
        assert!(item.created_at.is_none());
    }

    #[test]
    fn test_media_url_priority_and_empty_values() {
        let item = Item::new("a", json!({"audio_url": "", "media_url": "https://cdn/a.mp3"}));
        assert_eq!(item.media_url(), Some("https://cdn/a.mp3"));

        let item = Item::new("b", json!({"audio_url": "https://cdn/b.mp3", "url": "https://x"}));
        assert_eq!(item.media_url(), Some("https://cdn/b.mp3"));

        let item = Item::new("c", json!({"title": "none"}));
        assert_eq!(item.media_url(), None);
    }

    #[test]
    fn test_known_ids_clones_share_state() {
        let known = KnownIds::new(HashSet::from(["a".to_string()]));
        let view = known.clone();
        assert!(view.contains("a"));
        assert!(known.insert("b"));
        assert!(!known.insert("b"));
        assert!(view.contains("b"));
        assert_eq!(view.len(), 2);
        assert!(KnownIds::default().is_empty());
    }

    #[test]
    fn test_title_blank_is_none() {
        assert_eq!(Item::new("a", json!({"title": "   "})).title(), None);
        assert_eq!(Item::new("a", json!({"title": " Hi "})).title(), Some("Hi"));
    }
}
