//! Types for the catalog module.

use chrono::{DateTime, Utc};

/// How much of the remote listing a run walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Early-stop pagination against the known ids.
    Incremental,
    /// Walk the listing to its end.
    Full,
}

impl SyncMode {
    /// Convert to the string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incremental => "incremental",
            Self::Full => "full",
        }
    }

    /// Parse from the string stored in the database.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "incremental" => Some(Self::Incremental),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters recorded when a sync run finishes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRunStats {
    pub items_listed: u64,
    pub downloaded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub aborted: bool,
}

/// A row of the `sync_runs` table.
#[derive(Debug, Clone)]
pub struct SyncRunRecord {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub mode: SyncMode,
    pub stats: SyncRunStats,
}

/// Summary of catalog contents for the `status` command.
#[derive(Debug, Clone)]
pub struct CatalogSummary {
    pub total_items: u64,
    pub last_run: Option<SyncRunRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_mode_roundtrip() {
        for mode in [SyncMode::Incremental, SyncMode::Full] {
            assert_eq!(SyncMode::from_str(mode.as_str()), Some(mode));
        }
        assert_eq!(SyncMode::from_str("partial"), None);
    }
}
