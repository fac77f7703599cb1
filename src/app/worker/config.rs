//! Worker configuration management
//!
//! Pool size, retry policy and transfer granularity for download workers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{files, limits, workers};
use crate::errors::{DownloadError, DownloadResult};

/// Configuration for download workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers to spawn
    pub worker_count: usize,
    /// Maximum retry attempts per entry after the first try
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff)
    pub retry_base_delay: Duration,
    /// Maximum retry delay (backoff cap)
    pub retry_max_delay: Duration,
    /// Exponential backoff multiplier for retries
    pub retry_backoff_multiplier: u32,
    /// Jitter fraction applied to each retry delay (0.0-1.0)
    pub backoff_jitter_percentage: f64,
    /// Largest slice written to disk between syncs
    pub chunk_size: usize,
    /// Re-hash artifacts even when a matching record exists
    pub force_verify: bool,
    /// Channel buffer size for entry reports
    pub report_buffer_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: workers::DEFAULT_WORKER_COUNT,
            max_retries: limits::MAX_RETRIES,
            retry_base_delay: limits::RETRY_BASE_DELAY,
            retry_max_delay: limits::RETRY_MAX_DELAY,
            retry_backoff_multiplier: limits::RETRY_BACKOFF_MULTIPLIER,
            backoff_jitter_percentage: limits::BACKOFF_JITTER_FACTOR,
            chunk_size: files::DEFAULT_CHUNK_SIZE,
            force_verify: false,
            report_buffer_size: workers::REPORT_BUFFER_SIZE,
        }
    }
}

impl WorkerConfig {
    /// Validate configuration values and return errors for invalid settings
    pub fn validate(&self) -> DownloadResult<()> {
        if self.worker_count == 0 {
            return Err(DownloadError::ConfigurationError(
                "Worker count cannot be zero".to_string(),
            ));
        }

        if self.worker_count > workers::MAX_WORKER_COUNT {
            return Err(DownloadError::ConfigurationError(format!(
                "Worker count ({}) exceeds maximum ({})",
                self.worker_count,
                workers::MAX_WORKER_COUNT
            )));
        }

        if self.chunk_size == 0 {
            return Err(DownloadError::ConfigurationError(
                "Chunk size cannot be zero".to_string(),
            ));
        }

        if self.retry_base_delay > self.retry_max_delay {
            return Err(DownloadError::ConfigurationError(
                "Retry base delay must not exceed max delay".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.backoff_jitter_percentage) {
            return Err(DownloadError::ConfigurationError(
                "Backoff jitter percentage must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.report_buffer_size == 0 {
            return Err(DownloadError::ConfigurationError(
                "Report buffer size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for WorkerConfig
#[derive(Debug, Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers
    pub fn worker_count(mut self, count: usize) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Set maximum retry attempts
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set retry delay bounds
    pub fn retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.config.retry_base_delay = base;
        self.config.retry_max_delay = max;
        self
    }

    /// Set backoff jitter fraction
    pub fn backoff_jitter(mut self, fraction: f64) -> Self {
        self.config.backoff_jitter_percentage = fraction;
        self
    }

    /// Set transfer chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Force re-verification of existing artifacts
    pub fn force_verify(mut self, force: bool) -> Self {
        self.config.force_verify = force;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> DownloadResult<WorkerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
