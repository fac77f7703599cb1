//! Worker type definitions
//!
//! Per-entry reports produced by workers and consumed by the coordinator.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::models::{EntryOutcome, TransferAction};

/// Terminal report for one entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryReport {
    /// Local path relative to the cache root
    pub path: String,
    /// Blob URL
    pub url: String,
    /// Transfer action that was carried out
    pub action: TransferAction,
    /// Final outcome
    pub outcome: EntryOutcome,
    /// Bytes received over the network for this entry
    pub bytes_transferred: u64,
    /// Transfer attempts made (0 when no transfer was needed)
    pub attempts: u32,
    /// Outcome came from a matching verification record
    pub fast_path: bool,
    /// Error message for failed or interrupted entries
    pub error: Option<String>,
    /// Wall time spent on the entry
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl EntryReport {
    /// Create a report with no transfer recorded yet
    pub fn new(path: impl Into<String>, url: impl Into<String>, action: TransferAction) -> Self {
        Self {
            path: path.into(),
            url: url.into(),
            action,
            outcome: EntryOutcome::DownloadFailed,
            bytes_transferred: 0,
            attempts: 0,
            fast_path: false,
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Switch to a full redownload after the existing file was rejected
    ///
    /// Clears any error left by the failed check so the report reflects
    /// only the transfer that follows.
    pub fn restart_as_redownload(&mut self) {
        self.action = TransferAction::Redownload;
        self.outcome = EntryOutcome::DownloadFailed;
        self.error = None;
    }

    /// One-line description for logs and the text summary
    pub fn describe(&self) -> String {
        match &self.error {
            Some(error) => format!("{} [{}] {}: {}", self.outcome, self.action, self.path, error),
            None => format!("{} [{}] {}", self.outcome, self.action, self.path),
        }
    }
}
