//! Application constants for depmirror
//!
//! Centralizes the constants used throughout the application, grouped by
//! functional domain.

use std::time::Duration;

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = concat!("depmirror/", env!("CARGO_PKG_VERSION"));

    /// Per-request timeout: time allowed for the response head and for each body read
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

    /// TCP keep-alive interval
    pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum idle connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 16;
}

/// Retry and backoff configuration
pub mod limits {
    use super::Duration;

    /// Maximum retry attempts for transient failures
    pub const MAX_RETRIES: u32 = 5;

    /// Base delay for exponential backoff
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

    /// Maximum backoff delay
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);

    /// Exponential backoff multiplier
    pub const RETRY_BACKOFF_MULTIPLIER: u32 = 2;

    /// Jitter factor for randomizing delays (0.0-1.0)
    pub const BACKOFF_JITTER_FACTOR: f64 = 0.2;
}

/// File operation constants
pub mod files {
    /// Suffix of the staging file that receives transferred bytes
    pub const PARTIAL_SUFFIX: &str = ".partial";

    /// Suffix of the temporary file used while materializing decompressed content
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Verification record database, stored at the cache root
    pub const RECORD_STORE_FILE: &str = ".verification.db";

    /// SQLite sidecar files that belong to the record database
    pub const RECORD_STORE_SIDECARS: [&str; 3] = [
        ".verification.db-wal",
        ".verification.db-shm",
        ".verification.db-journal",
    ];

    /// Advisory lock held by commands that write to the cache root
    pub const LOCK_FILE: &str = ".depmirror.lock";

    /// Buffer size for hashing and decompression (64KB)
    pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

    /// Default transfer chunk size (64KB)
    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

    /// Default cache root when none is configured
    pub const DEFAULT_CACHE_DIR: &str = "./output";
}

/// Worker and concurrency configuration
pub mod workers {
    /// Default number of download workers
    pub const DEFAULT_WORKER_COUNT: usize = 5;

    /// Maximum accepted worker count
    pub const MAX_WORKER_COUNT: usize = 64;

    /// Channel buffer size for entry reports
    pub const REPORT_BUFFER_SIZE: usize = 256;
}

/// Cache eviction constants
pub mod cache {
    /// Default maximum cache size
    pub const DEFAULT_MAX_CACHE_SIZE: &str = "100GB";

    /// Default usage percentage that triggers eviction
    pub const DEFAULT_CLEANUP_THRESHOLD_PCT: u8 = 90;

    /// Percentage points below the threshold that eviction drives usage down to
    pub const DEFAULT_EVICTION_GAP_PCT: u8 = 10;
}

/// Coordinator and orchestration constants
pub mod coordinator {
    use super::Duration;

    /// Interval between eviction passes while a fetch is running
    pub const EVICTION_INTERVAL: Duration = Duration::from_secs(60);

    /// Timeout for background task shutdown
    pub const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Interval between queue progress log lines
    pub const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(30);
}

/// Configuration file discovery
pub mod config {
    /// Project-local configuration file name
    pub const LOCAL_CONFIG_FILE: &str = "depmirror.toml";

    /// Directory under the user config dir
    pub const CONFIG_DIR_NAME: &str = "depmirror";
}

pub use files::{PARTIAL_SUFFIX, RECORD_STORE_FILE, TEMP_FILE_SUFFIX};
pub use http::{DEFAULT_TIMEOUT as HTTP_TIMEOUT, USER_AGENT};
pub use limits::MAX_RETRIES;
pub use workers::DEFAULT_WORKER_COUNT;
