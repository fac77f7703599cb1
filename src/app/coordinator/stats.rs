//! Run statistics and the final report
//!
//! Aggregates per-entry reports into the counts printed at the end of a fetch
//! and into the JSON report.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::cache::EvictionReport;
use crate::app::models::{EntryOutcome, TransferAction};
use crate::app::worker::EntryReport;

/// Summary counts across all entries of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Entries started from byte 0 with nothing on disk
    pub new: usize,
    /// Entries continued from a staging file or undersized artifact
    pub resumed: usize,
    /// Entries whose local bytes were discarded and fetched again
    pub redownloaded: usize,
    /// Entries that needed no transfer
    pub verify_only: usize,
    /// Entries ending `Valid` or `RedownloadedValid`
    pub valid: usize,
    /// Entries whose content did not match the expected hash or size
    pub hash_mismatch: usize,
    /// Entries whose compressed content failed to decode
    pub corrupt: usize,
    /// Entries whose transfer failed
    pub errors: usize,
    /// Entries cut short by shutdown
    pub interrupted: usize,
    /// Entries never dispatched because of shutdown
    pub not_started: usize,
    /// Bytes received over the network
    pub bytes_transferred: u64,
    /// Entries answered from a verification record
    pub fast_path_hits: usize,
}

impl RunCounts {
    /// Fold one entry report into the counts
    pub fn record(&mut self, report: &EntryReport) {
        match report.action {
            TransferAction::New => self.new += 1,
            TransferAction::Resume { .. } => self.resumed += 1,
            TransferAction::Redownload => self.redownloaded += 1,
            TransferAction::VerifyOnly => self.verify_only += 1,
        }

        match report.outcome {
            EntryOutcome::Valid | EntryOutcome::RedownloadedValid => self.valid += 1,
            EntryOutcome::HashMismatch => self.hash_mismatch += 1,
            EntryOutcome::Corrupt => self.corrupt += 1,
            EntryOutcome::DownloadFailed => self.errors += 1,
            EntryOutcome::Interrupted => self.interrupted += 1,
        }

        self.bytes_transferred += report.bytes_transferred;
        if report.fast_path {
            self.fast_path_hits += 1;
        }
    }

    /// Entries that ended in a failed state
    pub fn failed(&self) -> usize {
        self.hash_mismatch + self.corrupt + self.errors
    }
}

/// Final result of a fetch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Wall time of the whole run
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Entries handed to the run
    pub total_entries: usize,
    /// Aggregate counts
    pub counts: RunCounts,
    /// Stale verification records purged before dispatch
    pub stale_records_purged: usize,
    /// Every eviction pass that did something
    pub evictions: Vec<EvictionReport>,
    /// Shutdown was requested before the run finished
    pub cancelled: bool,
    /// Per-entry reports, in completion order
    pub entries: Vec<EntryReport>,
}

impl RunReport {
    /// Start an empty report
    pub fn new(total_entries: usize) -> Self {
        Self {
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            total_entries,
            counts: RunCounts::default(),
            stale_records_purged: 0,
            evictions: Vec::new(),
            cancelled: false,
            entries: Vec::new(),
        }
    }

    /// Add one finished entry
    pub fn push(&mut self, report: EntryReport) {
        self.counts.record(&report);
        self.entries.push(report);
    }

    /// Keep an eviction report if the pass removed anything
    pub fn push_eviction(&mut self, eviction: EvictionReport) {
        if eviction.files_removed > 0 {
            self.evictions.push(eviction);
        }
    }

    /// Whether any entry ended in a failed state
    pub fn has_failures(&self) -> bool {
        self.counts.failed() > 0
    }

    /// Bytes freed across all eviction passes
    pub fn bytes_evicted(&self) -> u64 {
        self.evictions.iter().map(|e| e.bytes_freed).sum()
    }

    /// Failed and interrupted entries
    pub fn problem_entries(&self) -> impl Iterator<Item = &EntryReport> {
        self.entries
            .iter()
            .filter(|r| r.outcome.is_failure() || r.outcome == EntryOutcome::Interrupted)
    }

    /// Outcome label counts, for compact display
    pub fn outcome_histogram(&self) -> BTreeMap<&'static str, usize> {
        let mut histogram = BTreeMap::new();
        for report in &self.entries {
            *histogram.entry(report.outcome.label()).or_insert(0) += 1;
        }
        histogram
    }

    /// Multi-line text summary
    pub fn summary(&self) -> String {
        let c = &self.counts;
        let mut lines = vec![
            format!(
                "Processed {} entries in {}",
                self.entries.len(),
                format_duration(self.elapsed)
            ),
            format!(
                "  NEW: {}  RESUME: {}  REDOWNLOAD: {}  VERIFY-ONLY: {}",
                c.new, c.resumed, c.redownloaded, c.verify_only
            ),
            format!(
                "  VALID: {}  HASH-MISMATCH: {}  CORRUPT: {}  ERROR: {}",
                c.valid, c.hash_mismatch, c.corrupt, c.errors
            ),
            format!(
                "  Transferred: {}  Fast-path hits: {}",
                format_bytes(c.bytes_transferred),
                c.fast_path_hits
            ),
        ];

        if c.interrupted > 0 || c.not_started > 0 {
            lines.push(format!(
                "  Interrupted: {}  Not started: {}",
                c.interrupted, c.not_started
            ));
        }
        if self.stale_records_purged > 0 {
            lines.push(format!(
                "  Purged {} stale verification records",
                self.stale_records_purged
            ));
        }
        if !self.evictions.is_empty() {
            let files: usize = self.evictions.iter().map(|e| e.files_removed).sum();
            lines.push(format!(
                "  Evicted {} files ({})",
                files,
                format_bytes(self.bytes_evicted())
            ));
        }

        lines.join("\n")
    }
}

/// Format a duration as `1h 2m 3s`, `2m 3s` or `3.4s`
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

/// Format a byte count with a binary unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
