//! Verification record type
//!
//! A record is the persisted fact that a path, at a given size and
//! modification time, was hashed against an expected digest with a given
//! outcome.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::app::hash::Sha1Hash;
use crate::app::models::{LocalFileState, VerificationOutcome};

/// Persisted verification result for one cache path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Path relative to the cache root, `/`-separated
    pub path: String,
    /// File size observed when the record was written
    pub size: u64,
    /// Modification time observed when the record was written (ns since epoch)
    pub modified_ns: i64,
    /// Digest the file was checked against
    pub expected_hash: Sha1Hash,
    /// When the check happened
    pub verified_at: DateTime<Utc>,
    /// What the check found
    pub outcome: VerificationOutcome,
}

impl VerificationRecord {
    /// Build a record for a file state observed just now
    pub fn new(
        path: impl Into<String>,
        state: &LocalFileState,
        expected_hash: Sha1Hash,
        outcome: VerificationOutcome,
    ) -> Self {
        Self {
            path: path.into(),
            size: state.size,
            modified_ns: state.modified_ns,
            expected_hash,
            verified_at: Utc::now(),
            outcome,
        }
    }

    /// Whether this record still describes `state` checked against `expected`
    ///
    /// A record only vouches for a file when the file exists and its size,
    /// modification time and expected digest are all unchanged.
    pub fn matches(&self, state: &LocalFileState, expected: &Sha1Hash) -> bool {
        state.exists
            && self.size == state.size
            && self.modified_ns == state.modified_ns
            && &self.expected_hash == expected
    }

    /// Timestamp format used in the database
    ///
    /// Fixed precision keeps lexicographic and chronological order identical.
    pub fn format_timestamp(at: &DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}
