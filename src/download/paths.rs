use std::path::{Path, PathBuf};

use crate::item::Item;
use crate::types::MediaFormat;

/// Longest title fragment kept in a filename, in characters.
pub const MAX_TITLE_CHARS: usize = 80;

const UNTITLED: &str = "untitled";

/// Make a display title safe for use as a filename stem.
///
/// Characters invalid on common filesystems (`/ \ : * ? " < > |` and control
/// characters) become `_`, whitespace runs collapse to a single space, and
/// the result is trimmed and truncated to [`MAX_TITLE_CHARS`].
pub fn clean_title(title: &str) -> String {
    let mut result = String::with_capacity(title.len().min(MAX_TITLE_CHARS * 4));
    let mut pending_space = false;
    let mut kept = 0usize;

    for c in title.chars() {
        if kept >= MAX_TITLE_CHARS {
            break;
        }
        if c.is_whitespace() {
            pending_space = !result.is_empty();
            continue;
        }
        if pending_space {
            result.push(' ');
            kept += 1;
            pending_space = false;
            if kept >= MAX_TITLE_CHARS {
                break;
            }
        }
        let safe = if is_invalid_path_char(c) { '_' } else { c };
        result.push(safe);
        kept += 1;
    }

    let trimmed = result.trim_end();
    if trimmed.is_empty() {
        UNTITLED.to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_invalid_path_char(c: char) -> bool {
    matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
}

/// Filename stem for an item: cleaned title plus encoded id, so two items
/// sharing a title never collide.
pub fn base_filename(item: &Item) -> String {
    let title = clean_title(item.title().unwrap_or(UNTITLED));
    format!("{title}_{}", encode_id(&item.id))
}

/// Escape an id for use in a filename.
///
/// Unsafe characters and `%` itself become `%XX` per UTF-8 byte. Distinct ids
/// always map to distinct strings.
fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    let mut buf = [0u8; 4];
    for c in id.chars() {
        if is_invalid_path_char(c) || c == '%' {
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Destination file for one format of an item.
pub fn target_path(directory: &Path, item: &Item, format: MediaFormat) -> PathBuf {
    directory.join(format!("{}.{}", base_filename(item), format.extension()))
}

/// Media URL for a format, derived from the primary URL.
///
/// Non-primary formats swap the file extension of the URL path, keeping any
/// query string. Returns `None` if the path has no extension to swap.
pub fn format_url(primary_url: &str, format: MediaFormat) -> Option<String> {
    if format == MediaFormat::Primary {
        return Some(primary_url.to_string());
    }

    let path_end = primary_url.find(['?', '#']).unwrap_or(primary_url.len());
    let (path, suffix) = primary_url.split_at(path_end);
    let last_segment_start = path.rfind('/').map_or(0, |i| i + 1);
    let dot = path[last_segment_start..].rfind('.')? + last_segment_start;

    Some(format!("{}.{}{}", &path[..dot], format.extension(), suffix))
}

/// Reduce a username to characters safe for a directory name.
pub fn sanitize_username(username: &str) -> String {
    let cleaned: String = username
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Never let a bare "." or ".." escape the data directory.
    if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}
