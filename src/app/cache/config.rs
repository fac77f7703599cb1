//! Cache configuration types and defaults
//!
//! Size limits and eviction thresholds for the cache root.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{cache, coordinator, files};
use crate::errors::{ConfigError, ConfigResult};

/// Configuration for the cache root and its eviction policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding artifacts and the record database
    pub cache_root: PathBuf,
    /// Maximum cache size in bytes (0 = unlimited)
    pub max_cache_size: u64,
    /// Percentage of the maximum at which eviction starts
    pub cleanup_threshold_pct: u8,
    /// Percentage of the maximum eviction brings usage down to
    /// (None = ten points below the threshold)
    pub eviction_target_pct: Option<u8>,
    /// How often the limit is enforced while a run is in progress
    pub eviction_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from(files::DEFAULT_CACHE_DIR),
            max_cache_size: 0,
            cleanup_threshold_pct: cache::DEFAULT_CLEANUP_THRESHOLD_PCT,
            eviction_target_pct: None,
            eviction_interval: coordinator::EVICTION_INTERVAL,
        }
    }
}

impl CacheConfig {
    /// Create a configuration for a given cache root
    pub fn with_cache_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Default::default()
        }
    }

    /// Set maximum cache size in bytes
    pub fn with_max_cache_size(mut self, max_size: u64) -> Self {
        self.max_cache_size = max_size;
        self
    }

    /// Set the eviction threshold percentage
    pub fn with_cleanup_threshold(mut self, pct: u8) -> Self {
        self.cleanup_threshold_pct = pct;
        self
    }

    /// Set the eviction target percentage
    pub fn with_eviction_target(mut self, pct: u8) -> Self {
        self.eviction_target_pct = Some(pct);
        self
    }

    /// Set the periodic eviction interval
    pub fn with_eviction_interval(mut self, interval: Duration) -> Self {
        self.eviction_interval = interval;
        self
    }

    /// Effective target percentage for a threshold
    pub fn target_pct(&self) -> u8 {
        self.eviction_target_pct.unwrap_or_else(|| {
            self.cleanup_threshold_pct
                .saturating_sub(cache::DEFAULT_EVICTION_GAP_PCT)
        })
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a percentage is out of range or
    /// the target is not below the threshold.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cleanup_threshold_pct == 0 || self.cleanup_threshold_pct > 100 {
            return Err(ConfigError::InvalidValue {
                field: "cleanup_threshold".to_string(),
                value: self.cleanup_threshold_pct.to_string(),
                reason: "Must be between 1 and 100".to_string(),
            });
        }

        if let Some(target) = self.eviction_target_pct {
            if target >= self.cleanup_threshold_pct {
                return Err(ConfigError::InvalidValue {
                    field: "eviction_target".to_string(),
                    value: target.to_string(),
                    reason: format!(
                        "Must be below the cleanup threshold ({}%)",
                        self.cleanup_threshold_pct
                    ),
                });
            }
        }

        if self.eviction_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "eviction_interval".to_string(),
                value: "0s".to_string(),
                reason: "Must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
