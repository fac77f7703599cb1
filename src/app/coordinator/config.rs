//! Configuration for the fetch coordinator
//!
//! Bundles the cache, client and worker settings a run needs, plus the
//! coordinator's own switches.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::cache::CacheConfig;
use crate::app::client::ClientConfig;
use crate::app::worker::WorkerConfig;
use crate::constants::coordinator;
use crate::errors::{AppError, Result};

/// Configuration for the fetch coordinator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Cache root, budget and eviction settings
    pub cache: CacheConfig,
    /// HTTP client settings
    pub client: ClientConfig,
    /// Worker pool and retry settings
    pub worker: WorkerConfig,
    /// Install Ctrl+C / SIGTERM handlers for the duration of the run
    pub handle_signals: bool,
    /// Interval between queue progress log lines
    pub progress_log_interval: Option<Duration>,
}

impl CoordinatorConfig {
    /// Build from component configurations
    pub fn new(cache: CacheConfig, client: ClientConfig, worker: WorkerConfig) -> Self {
        Self {
            cache,
            client,
            worker,
            handle_signals: false,
            progress_log_interval: None,
        }
    }

    /// Set worker count
    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker.worker_count = count;
        self
    }

    /// Install OS signal handlers while running
    pub fn with_signal_handling(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    /// Interval between progress log lines
    pub fn progress_interval(&self) -> Duration {
        self.progress_log_interval
            .unwrap_or(coordinator::PROGRESS_LOG_INTERVAL)
    }

    /// Validate every component configuration
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.client.validate()?;
        self.worker.validate()?;

        if self.progress_interval().is_zero() {
            return Err(AppError::generic("Progress log interval cannot be zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.handle_signals);
        assert_eq!(config.progress_interval(), coordinator::PROGRESS_LOG_INTERVAL);
    }

    #[test]
    fn test_builder_methods() {
        let config = CoordinatorConfig::default()
            .with_worker_count(16)
            .with_signal_handling(true);
        assert_eq!(config.worker.worker_count, 16);
        assert!(config.handle_signals);
    }

    #[test]
    fn test_invalid_component_rejected() {
        let config = CoordinatorConfig::default().with_worker_count(0);
        assert!(config.validate().is_err());

        let mut config = CoordinatorConfig::default();
        config.cache.cleanup_threshold_pct = 0;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
