//! Decoding of a single listing page.
//!
//! The endpoint has shipped several envelope shapes over time. Each accepted
//! shape is listed here; anything else is rejected instead of being read as
//! an empty page, which would silently end pagination.

use serde_json::Value;

use super::error::RemoteApiError;
use crate::item::Item;

/// Envelope keys that may hold the item array, checked in order.
pub const ITEM_ARRAY_KEYS: &[&str] = &["clips", "items", "songs", "tracks", "data", "results"];

/// Parse a listing response body into items.
///
/// Records without a string `id` are dropped with a warning.
pub fn parse_page(url: &str, body: &[u8]) -> Result<Vec<Item>, RemoteApiError> {
    let value: Value = serde_json::from_slice(body).map_err(|source| RemoteApiError::Decode {
        url: url.to_string(),
        source,
    })?;

    let records = extract_records(value).map_err(|keys| RemoteApiError::UnrecognizedShape {
        url: url.to_string(),
        keys,
    })?;

    let total = records.len();
    let items: Vec<Item> = records.into_iter().filter_map(Item::from_record).collect();
    if items.len() < total {
        tracing::warn!(
            "Dropped {} listing records without an id from {}",
            total - items.len(),
            url
        );
    }
    Ok(items)
}

/// Pull the record array out of a response. On failure returns the keys
/// that were present, for the error message.
fn extract_records(value: Value) -> Result<Vec<Value>, Vec<String>> {
    match value {
        Value::Array(records) => Ok(records),
        Value::Object(mut map) => {
            let mut saw_array = false;
            for key in ITEM_ARRAY_KEYS {
                if let Some(Value::Array(records)) = map.get_mut(*key) {
                    if !records.is_empty() {
                        return Ok(std::mem::take(records));
                    }
                    saw_array = true;
                }
            }
            if saw_array {
                Ok(Vec::new())
            } else {
                Err(map.keys().cloned().collect())
            }
        }
        _ => Err(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<Vec<Item>, RemoteApiError> {
        parse_page("https://api/list?page=0", value.to_string().as_bytes())
    }

    #[test]
    fn test_top_level_array() {
        let items = parse(json!([{"id": "a"}, {"id": "b"}])).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_each_envelope_key_is_accepted() {
        for key in ITEM_ARRAY_KEYS {
            let items = parse(json!({ *key: [{"id": "a"}] })).unwrap();
            assert_eq!(items[0].id, "a", "key {key}");
        }
    }

    #[test]
    fn test_first_non_empty_array_wins() {
        let items = parse(json!({"clips": [], "data": [{"id": "d"}], "results": [{"id": "r"}]})).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "d");
    }

    #[test]
    fn test_all_empty_arrays_is_empty_page() {
        assert!(parse(json!({"clips": [], "num_total_results": 0})).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_shape_is_rejected() {
        let err = parse(json!({"detail": "Unauthorized"})).unwrap_err();
        match err {
            RemoteApiError::UnrecognizedShape { keys, .. } => assert_eq!(keys, vec!["detail"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            parse(json!("string")),
            Err(RemoteApiError::UnrecognizedShape { .. })
        ));
    }

    #[test]
    fn test_non_json_body() {
        let err = parse_page("u", b"<html>").unwrap_err();
        assert!(matches!(err, RemoteApiError::Decode { .. }));
    }

    #[test]
    fn test_records_without_id_are_dropped() {
        let items = parse(json!([{"id": "a"}, {"title": "x"}])).unwrap();
        assert_eq!(items.len(), 1);
    }
}
