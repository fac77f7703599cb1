//! Data models for depmirror
//!
//! Entries describe what should exist in the cache; file states describe what
//! does exist right now. Everything the orchestrator decides is a function of
//! the two.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::hash::Sha1Hash;
use crate::constants::files;
use crate::errors::{ManifestError, ManifestResult};

/// One blob to fetch into the cache
///
/// Immutable once loaded. `local_path` is relative to the cache root and is
/// unique across a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEntry {
    /// Remote location of the blob
    pub url: Url,
    /// Destination relative to the cache root
    #[serde(alias = "localPath", alias = "dest")]
    pub local_path: PathBuf,
    /// Size of the stored artifact (after decompression for compressed blobs)
    #[serde(alias = "expectedSize", alias = "size")]
    pub expected_size: u64,
    /// SHA-1 of the stored artifact (after decompression for compressed blobs)
    #[serde(alias = "expectedHash", alias = "hash")]
    pub expected_hash: Sha1Hash,
    /// Whether the transferred bytes are gzip-compressed
    #[serde(default)]
    pub compressed: bool,
    /// Size of the compressed transfer, when known
    #[serde(default, alias = "compressedSize")]
    pub compressed_size: Option<u64>,
}

impl DependencyEntry {
    /// Create an uncompressed entry
    pub fn new(
        url: Url,
        local_path: impl Into<PathBuf>,
        expected_size: u64,
        expected_hash: Sha1Hash,
    ) -> Self {
        Self {
            url,
            local_path: local_path.into(),
            expected_size,
            expected_hash,
            compressed: false,
            compressed_size: None,
        }
    }

    /// Mark the entry as gzip-compressed on the wire
    pub fn with_compression(mut self, compressed_size: Option<u64>) -> Self {
        self.compressed = true;
        self.compressed_size = compressed_size;
        self
    }

    /// Number of bytes the transfer should produce, if known
    ///
    /// Plain entries transfer exactly `expected_size` bytes. Compressed entries
    /// transfer `compressed_size` bytes when the manifest supplies it.
    pub fn transfer_size(&self) -> Option<u64> {
        if self.compressed {
            self.compressed_size
        } else {
            Some(self.expected_size)
        }
    }

    /// Store key: the local path with `/` separators
    pub fn record_key(&self) -> String {
        record_key(&self.local_path)
    }

    /// Check the entry is usable before any filesystem or network work
    ///
    /// # Errors
    ///
    /// Returns `ManifestError` if the URL is not http(s), or the local path is
    /// empty, absolute, escapes the cache root, or collides with names the
    /// cache reserves for itself.
    pub fn validate(&self) -> ManifestResult<()> {
        if !matches!(self.url.scheme(), "http" | "https") {
            return Err(ManifestError::InvalidUrl {
                url: self.url.to_string(),
            });
        }

        let invalid_path = || ManifestError::InvalidPath {
            path: self.local_path.display().to_string(),
        };

        if self.local_path.as_os_str().is_empty() {
            return Err(invalid_path());
        }

        for component in self.local_path.components() {
            match component {
                Component::Normal(_) => {}
                Component::CurDir => {}
                _ => return Err(invalid_path()),
            }
        }

        let file_name = self
            .local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(invalid_path)?;

        if file_name.ends_with(files::PARTIAL_SUFFIX)
            || file_name.ends_with(files::TEMP_FILE_SUFFIX)
            || is_reserved_name(file_name)
        {
            return Err(invalid_path());
        }

        Ok(())
    }
}

/// Normalize a relative path into the `/`-separated form used as a store key
pub fn record_key(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a file name belongs to the record database or the cache lock
pub fn is_reserved_name(file_name: &str) -> bool {
    file_name == files::RECORD_STORE_FILE
        || file_name == files::LOCK_FILE
        || files::RECORD_STORE_SIDECARS.contains(&file_name)
}

/// Staging path that receives transferred bytes for `final_path`
pub fn partial_path(final_path: &Path) -> PathBuf {
    with_suffix(final_path, files::PARTIAL_SUFFIX)
}

/// Temporary path used while materializing decompressed content
pub fn temp_path(final_path: &Path) -> PathBuf {
    with_suffix(final_path, files::TEMP_FILE_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Observed state of a path, read fresh before every decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalFileState {
    /// A regular file exists at the path
    pub exists: bool,
    /// Size in bytes (0 when absent)
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch (0 when absent)
    pub modified_ns: i64,
}

impl LocalFileState {
    /// State of a path that does not exist
    pub fn absent() -> Self {
        Self::default()
    }

    /// Build a state from file metadata
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            exists: metadata.is_file(),
            size: metadata.len(),
            modified_ns: metadata.modified().map(system_time_to_ns).unwrap_or(0),
        }
    }

    /// Read the current state of `path`
    pub async fn observe(path: &Path) -> std::io::Result<Self> {
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => Ok(Self::from_metadata(&metadata)),
            Ok(_) => Ok(Self::absent()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::absent()),
            Err(e) => Err(e),
        }
    }

    /// Blocking variant of [`observe`](Self::observe)
    pub fn observe_blocking(path: &Path) -> std::io::Result<Self> {
        match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => Ok(Self::from_metadata(&metadata)),
            Ok(_) => Ok(Self::absent()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::absent()),
            Err(e) => Err(e),
        }
    }
}

/// Convert a timestamp into signed nanoseconds since the Unix epoch
pub fn system_time_to_ns(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

/// What the orchestrator decided to do with an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferAction {
    /// Nothing on disk, fetch from byte 0
    New,
    /// Continue a partial transfer at `offset`
    Resume { offset: u64 },
    /// Discard local bytes and fetch from byte 0
    Redownload,
    /// Local artifact already has the expected size; verify only
    VerifyOnly,
}

impl TransferAction {
    /// Short label used in summaries
    pub fn label(&self) -> &'static str {
        match self {
            TransferAction::New => "NEW",
            TransferAction::Resume { .. } => "RESUME",
            TransferAction::Redownload => "REDOWNLOAD",
            TransferAction::VerifyOnly => "VERIFY",
        }
    }
}

impl fmt::Display for TransferAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferAction::Resume { offset } => write!(f, "RESUME@{}", offset),
            other => f.write_str(other.label()),
        }
    }
}

/// Result of hashing an artifact against its expected digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// Size and hash match
    Valid,
    /// Content hashed cleanly but does not match
    HashMismatch,
    /// Compressed content could not be decoded
    Corrupt,
}

impl VerificationOutcome {
    /// Value persisted in the record store
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationOutcome::Valid => "VALID",
            VerificationOutcome::HashMismatch => "HASH_MISMATCH",
            VerificationOutcome::Corrupt => "CORRUPT",
        }
    }

    /// Parse a value persisted in the record store
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "VALID" => Some(VerificationOutcome::Valid),
            "HASH_MISMATCH" => Some(VerificationOutcome::HashMismatch),
            "CORRUPT" => Some(VerificationOutcome::Corrupt),
            _ => None,
        }
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of one entry in a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOutcome {
    /// Artifact verified without a full redownload
    Valid,
    /// Artifact had to be fetched again from byte 0 and then verified
    RedownloadedValid,
    /// Artifact is on disk but its hash does not match
    HashMismatch,
    /// Transfer failed permanently or retries were exhausted
    DownloadFailed,
    /// Compressed transfer could not be decoded; artifacts removed
    Corrupt,
    /// Cut short by a shutdown request; partial left resumable
    Interrupted,
}

impl EntryOutcome {
    /// Whether the artifact is valid on disk
    pub fn is_success(&self) -> bool {
        matches!(self, EntryOutcome::Valid | EntryOutcome::RedownloadedValid)
    }

    /// Whether the entry counts as failed in the summary
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EntryOutcome::HashMismatch | EntryOutcome::DownloadFailed | EntryOutcome::Corrupt
        )
    }

    /// Label used in summaries
    pub fn label(&self) -> &'static str {
        match self {
            EntryOutcome::Valid => "VALID",
            EntryOutcome::RedownloadedValid => "REDOWNLOADED-VALID",
            EntryOutcome::HashMismatch => "HASH-MISMATCH",
            EntryOutcome::DownloadFailed => "ERROR",
            EntryOutcome::Corrupt => "CORRUPT",
            EntryOutcome::Interrupted => "INTERRUPTED",
        }
    }
}

impl fmt::Display for EntryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
