//! Error types for depmirror
//!
//! Errors are split by component. Entry-level problems (a blob that cannot be
//! fetched or does not verify) are reported per entry and never abort a run;
//! record-store and eviction failures are fatal and surface as [`AppError`].

use std::path::PathBuf;
use thiserror::Error;

/// Download and HTTP client errors
#[derive(Error, Debug)]
pub enum DownloadError {
    /// HTTP request error (connect failure, reset, malformed response)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error while writing the staging file
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No response or no body progress within the request timeout
    #[error("Download timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Server returned a 5xx status
    #[error("Server error: HTTP {status}")]
    ServerError { status: u16 },

    /// Server asked us to slow down (429) or timed the request out (408)
    #[error("Server throttled the request: HTTP {status}")]
    Throttled { status: u16 },

    /// Resource does not exist upstream
    #[error("Resource not found: {url}")]
    NotFound { url: String },

    /// Access to the resource is denied
    #[error("Access forbidden: {url}")]
    Forbidden { url: String },

    /// Any other non-retryable status
    #[error("Request rejected with HTTP {status}: {url}")]
    ClientError { status: u16, url: String },

    /// A partial response started somewhere other than the requested offset
    #[error("Server did not honor range request starting at byte {offset}")]
    RangeNotHonored { offset: u64 },

    /// Server answered 416 for the requested offset
    #[error("Range starting at byte {offset} not satisfiable")]
    RangeNotSatisfiable { offset: u64 },

    /// Body ended before the expected number of bytes arrived
    #[error("Incomplete download: received {received} bytes, expected {expected} bytes")]
    IncompleteDownload { received: u64, expected: u64 },

    /// Maximum retries exceeded
    #[error("Maximum retry attempts ({max_retries}) exceeded: {last_error}")]
    MaxRetriesExceeded { max_retries: u32, last_error: String },

    /// Transfer stopped because shutdown was requested
    #[error("Transfer interrupted by shutdown request")]
    Interrupted,

    /// Invalid client or worker configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl DownloadError {
    /// Whether another attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Http(e) => !e.is_builder(),
            DownloadError::Timeout { .. }
            | DownloadError::ServerError { .. }
            | DownloadError::Throttled { .. }
            | DownloadError::RangeNotHonored { .. }
            | DownloadError::RangeNotSatisfiable { .. }
            | DownloadError::IncompleteDownload { .. } => true,
            _ => false,
        }
    }

    /// Whether the failure must not be retried at all
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DownloadError::NotFound { .. }
                | DownloadError::Forbidden { .. }
                | DownloadError::ClientError { .. }
                | DownloadError::ConfigurationError(_)
        )
    }

    /// Map an unsuccessful HTTP status to its error class
    pub fn from_status(status: u16, url: &str) -> Self {
        match status {
            404 => DownloadError::NotFound {
                url: url.to_string(),
            },
            403 => DownloadError::Forbidden {
                url: url.to_string(),
            },
            408 | 429 => DownloadError::Throttled { status },
            500..=599 => DownloadError::ServerError { status },
            _ => DownloadError::ClientError {
                status,
                url: url.to_string(),
            },
        }
    }
}

/// Verification record store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite failure
    #[error("Verification database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem failure around the database
    #[error("Verification database I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored row could not be decoded
    #[error("Corrupt verification record for {path}: {reason}")]
    CorruptRecord { path: String, reason: String },

    /// Background task running a store operation panicked or was cancelled
    #[error("Verification store task failed: {0}")]
    TaskFailed(String),
}

/// Manifest (entries file) errors
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Entries file not found
    #[error("Entries file not found: {path}")]
    NotFound { path: PathBuf },

    /// JSON parsing error
    #[error("JSON parsing error in entries file: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// I/O error reading the entries file
    #[error("I/O error reading entries file: {0}")]
    Io(#[from] std::io::Error),

    /// Two entries target the same local path
    #[error("Duplicate local path in entries file: {path}")]
    DuplicateEntry { path: String },

    /// Invalid hash format
    #[error("Invalid hash format: {hash}. Expected 40-character SHA-1 hex string")]
    InvalidHash { hash: String },

    /// Local path escapes the cache root or is otherwise unusable
    #[error("Invalid local path: {path}")]
    InvalidPath { path: String },

    /// Download URL is not http(s)
    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },
}

/// Cache management errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache directory not found or inaccessible
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// Another process holds the cache lock
    #[error("Cache is in use by another process (lock held on {path})")]
    Locked { path: PathBuf },

    /// Filesystem operation on a cached artifact failed
    #[error("Cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File expected in the cache is missing
    #[error("Cached file missing: {path}")]
    FileMissing { path: PathBuf },

    /// Record store failure during a cache operation
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Background task running a cache operation panicked or was cancelled
    #[error("Cache task failed: {0}")]
    TaskFailed(String),
}

impl CacheError {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format: {0}")]
    InvalidFormat(#[from] toml::de::Error),

    /// Configuration file could not be read
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Size string could not be parsed
    #[error("Invalid size format: {input}")]
    InvalidSize { input: String },
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Download error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Record store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Manifest error
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// One or more entries ended in a failed state
    #[error("{failed} of {total} entries failed")]
    EntriesFailed { failed: usize, total: usize },

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Download(e) => e.is_transient(),
            AppError::Store(StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _))) => {
                e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
            }
            _ => false,
        }
    }

    /// Whether the error must stop the whole run rather than a single entry
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::Store(_) | AppError::Cache(CacheError::Store(_)) | AppError::Config(_)
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Download(_) => "download",
            AppError::Store(_) => "store",
            AppError::Manifest(_) => "manifest",
            AppError::Cache(_) => "cache",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::EntriesFailed { .. } => "entries",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Record store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Manifest result type alias
pub type ManifestResult<T> = std::result::Result<T, ManifestError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
