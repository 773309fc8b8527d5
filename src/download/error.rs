use thiserror::Error;

use crate::transport::TransportError;
use crate::types::MediaFormat;

/// Failure of one format of one item.
///
/// A 4xx answer is [`FormatError::Unavailable`]: the rendition exists only
/// for some accounts (a lossless tier, for instance), so it is reported as a
/// warning and does not fail the item on its own.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("{format} format unavailable (HTTP {status})")]
    Unavailable { format: MediaFormat, status: u16 },

    #[error("{format} download returned HTTP {status}")]
    HttpStatus { format: MediaFormat, status: u16 },

    #[error("{format} download failed: {source}")]
    Transport {
        format: MediaFormat,
        #[source]
        source: TransportError,
    },

    #[error("{format} file could not be written: {source}")]
    Disk {
        format: MediaFormat,
        #[source]
        source: std::io::Error,
    },

    #[error("{format} URL cannot be derived from {url}")]
    NoUrl { format: MediaFormat, url: String },
}

impl FormatError {
    pub fn format(&self) -> MediaFormat {
        match self {
            FormatError::Unavailable { format, .. }
            | FormatError::HttpStatus { format, .. }
            | FormatError::Transport { format, .. }
            | FormatError::Disk { format, .. }
            | FormatError::NoUrl { format, .. } => *format,
        }
    }

    /// Whether this is the soft "format unavailable" case.
    pub fn is_soft(&self) -> bool {
        matches!(self, FormatError::Unavailable { .. })
    }
}

/// Every requested format of an item failed.
#[derive(Debug, Error)]
#[error("all formats failed for {item_id}: {}", join_messages(.failures))]
pub struct DownloadError {
    pub item_id: String,
    pub failures: Vec<FormatError>,
}

fn join_messages(failures: &[FormatError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_soft() {
        let soft = FormatError::Unavailable {
            format: MediaFormat::Lossless,
            status: 403,
        };
        assert!(soft.is_soft());
        assert_eq!(soft.format(), MediaFormat::Lossless);

        let hard = FormatError::HttpStatus {
            format: MediaFormat::Primary,
            status: 503,
        };
        assert!(!hard.is_soft());

        let disk = FormatError::Disk {
            format: MediaFormat::Primary,
            source: std::io::Error::other("disk full"),
        };
        assert!(!disk.is_soft());
    }

    #[test]
    fn test_download_error_concatenates_messages() {
        let err = DownloadError {
            item_id: "abc".into(),
            failures: vec![
                FormatError::HttpStatus {
                    format: MediaFormat::Primary,
                    status: 500,
                },
                FormatError::Unavailable {
                    format: MediaFormat::Lossless,
                    status: 403,
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "all formats failed for abc: primary download returned HTTP 500; lossless format unavailable (HTTP 403)"
        );
    }
}
