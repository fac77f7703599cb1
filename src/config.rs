//! Configuration management for depmirror
//!
//! Settings are layered: built-in defaults, then a TOML file, then command
//! line flags. The file is the one named by `--config`, or the first of
//! `./depmirror.toml` and `<user config dir>/depmirror/config.toml` that
//! exists.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{CacheConfig, ClientConfig, CoordinatorConfig, WorkerConfig};
use crate::constants::{cache, config as config_files, coordinator, files, http, limits, workers};
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Cache root and eviction settings
    pub cache: CacheSection,
    /// HTTP client settings
    pub client: ClientSection,
    /// Worker pool and retry settings
    pub worker: WorkerSection,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// `[cache]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Cache directory path
    pub cache_root: PathBuf,
    /// Maximum cache size, e.g. `"100GB"` (`"0"` = unlimited)
    pub max_cache_size: String,
    /// Usage percentage at which eviction starts
    pub cleanup_threshold: u8,
    /// Usage percentage eviction drives down to (default: threshold - 10)
    pub eviction_target: Option<u8>,
    /// Interval between eviction passes during a fetch
    #[serde(with = "humantime_serde")]
    pub eviction_interval: Duration,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from(files::DEFAULT_CACHE_DIR),
            max_cache_size: cache::DEFAULT_MAX_CACHE_SIZE.to_string(),
            cleanup_threshold: cache::DEFAULT_CLEANUP_THRESHOLD_PCT,
            eviction_target: None,
            eviction_interval: coordinator::EVICTION_INTERVAL,
        }
    }
}

/// `[client]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    /// Time allowed for a response and for each body read
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Connect timeout
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// TCP keep-alive interval (unset = disabled)
    #[serde(with = "humantime_serde")]
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay setting
    pub tcp_nodelay: bool,
    /// Idle connection timeout (unset = no timeout)
    #[serde(with = "humantime_serde")]
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// Requests per second across all workers (0 = unlimited)
    pub rate_limit_rps: u32,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            tcp_keepalive: Some(http::TCP_KEEPALIVE),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            rate_limit_rps: 0,
        }
    }
}

/// `[worker]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    /// Number of concurrent workers
    pub workers: usize,
    /// Retries per entry after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
    /// Upper bound on a retry delay
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,
    /// Jitter fraction applied to retry delays
    pub backoff_jitter: f64,
    /// Largest slice written between syncs, e.g. `"64KB"`
    pub chunk_size: String,
    /// Re-hash artifacts even when a matching record exists
    pub force_verify: bool,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            workers: workers::DEFAULT_WORKER_COUNT,
            max_retries: limits::MAX_RETRIES,
            retry_base_delay: limits::RETRY_BASE_DELAY,
            retry_max_delay: limits::RETRY_MAX_DELAY,
            backoff_jitter: limits::BACKOFF_JITTER_FACTOR,
            chunk_size: format!("{}KB", files::DEFAULT_CHUNK_SIZE / 1024),
            force_verify: false,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when no verbosity flag is given
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Values given on the command line, applied over the file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub cache_root: Option<PathBuf>,
    pub max_cache_size: Option<String>,
    pub cleanup_threshold: Option<u8>,
    pub workers: Option<usize>,
    pub max_retries: Option<u32>,
    pub request_timeout: Option<Duration>,
    pub chunk_size: Option<String>,
    pub force_verify: bool,
}

impl AppConfig {
    /// Load configuration from `config_file_override` or the standard locations
    ///
    /// Missing standard files fall back to defaults; a missing explicit file
    /// is an error.
    pub async fn load(config_file_override: Option<&Path>) -> ConfigResult<Self> {
        let path = match config_file_override {
            Some(path) if !path.exists() => {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_config_file(),
        };

        match path {
            Some(path) => Self::load_from_file(&path).await,
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Find configuration file in standard locations
    pub fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from(format!(
            "./{}",
            config_files::LOCAL_CONFIG_FILE
        ))];
        if let Some(path) = Self::default_config_path() {
            search_paths.push(path);
        }

        search_paths.into_iter().find(|path| {
            let found = path.is_file();
            if found {
                debug!("Found config file: {}", path.display());
            }
            found
        })
    }

    /// Per-user config file location
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(config_files::CONFIG_DIR_NAME).join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let config = Self::from_toml(&content)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply command line overrides
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(root) = &overrides.cache_root {
            self.cache.cache_root = root.clone();
        }
        if let Some(size) = &overrides.max_cache_size {
            self.cache.max_cache_size = size.clone();
        }
        if let Some(pct) = overrides.cleanup_threshold {
            self.cache.cleanup_threshold = pct;
        }
        if let Some(workers) = overrides.workers {
            self.worker.workers = workers;
        }
        if let Some(retries) = overrides.max_retries {
            self.worker.max_retries = retries;
        }
        if let Some(timeout) = overrides.request_timeout {
            self.client.request_timeout = timeout;
        }
        if let Some(chunk) = &overrides.chunk_size {
            self.worker.chunk_size = chunk.clone();
        }
        if overrides.force_verify {
            self.worker.force_verify = true;
        }
    }

    /// Cache configuration only, for commands that never touch the network
    pub fn cache_config(&self) -> ConfigResult<CacheConfig> {
        let config = CacheConfig {
            cache_root: self.cache.cache_root.clone(),
            max_cache_size: parse_size(&self.cache.max_cache_size)?,
            cleanup_threshold_pct: self.cache.cleanup_threshold,
            eviction_target_pct: self.cache.eviction_target,
            eviction_interval: self.cache.eviction_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Convert to the runtime configuration of a fetch run
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a size string cannot be parsed or a value is
    /// out of range.
    pub fn to_runtime_config(&self) -> ConfigResult<CoordinatorConfig> {
        let cache = self.cache_config()?;

        let client = ClientConfig {
            request_timeout: self.client.request_timeout,
            connect_timeout: self.client.connect_timeout,
            tcp_keepalive: self.client.tcp_keepalive,
            tcp_nodelay: self.client.tcp_nodelay,
            pool_idle_timeout: self.client.pool_idle_timeout,
            pool_max_per_host: self.client.pool_max_per_host,
            rate_limit_rps: self.client.rate_limit_rps,
        };
        if client.request_timeout.is_zero() {
            return Err(invalid("timeout", "0s", "Must be greater than zero"));
        }

        let chunk_size = usize::try_from(parse_size(&self.worker.chunk_size)?)
            .map_err(|_| invalid("chunk_size", &self.worker.chunk_size, "Too large"))?;
        let worker = WorkerConfig {
            worker_count: self.worker.workers,
            max_retries: self.worker.max_retries,
            retry_base_delay: self.worker.retry_base_delay,
            retry_max_delay: self.worker.retry_max_delay,
            backoff_jitter_percentage: self.worker.backoff_jitter,
            chunk_size,
            force_verify: self.worker.force_verify,
            ..WorkerConfig::default()
        };
        worker.validate().map_err(|e| ConfigError::InvalidValue {
            field: "worker".to_string(),
            value: format!("{} workers, chunk size {}", worker.worker_count, worker.chunk_size),
            reason: e.to_string(),
        })?;

        Ok(CoordinatorConfig::new(cache, client, worker))
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse a size such as `"100GB"`, `"1.5 MB"` or `"4096"` into bytes
///
/// Units are 1024-based and case-insensitive; a bare integer is bytes.
pub fn parse_size(input: &str) -> ConfigResult<u64> {
    const UNITS: [(&str, u64); 5] = [
        ("TB", 1 << 40),
        ("GB", 1 << 30),
        ("MB", 1 << 20),
        ("KB", 1 << 10),
        ("B", 1),
    ];

    let size = input.trim().to_ascii_uppercase();
    let invalid_size = || ConfigError::InvalidSize {
        input: input.to_string(),
    };

    if let Ok(bytes) = size.parse::<u64>() {
        return Ok(bytes);
    }

    let (number, multiplier) = UNITS
        .iter()
        .find_map(|(unit, multiplier)| {
            size.strip_suffix(unit)
                .map(|number| (number.trim(), *multiplier))
        })
        .ok_or_else(invalid_size)?;

    let value: f64 = number.parse().map_err(|_| invalid_size())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid_size());
    }
    Ok((value * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100GB").unwrap(), 100 * 1024 * 1024 * 1024);
        assert_eq!(parse_size("64kb").unwrap(), 64 * 1024);
        assert_eq!(parse_size("1.5 MB").unwrap(), 1_572_864);
        assert_eq!(parse_size("2TB").unwrap(), 2 << 40);
        assert_eq!(parse_size("512B").unwrap(), 512);
        assert_eq!(parse_size(" 4096 ").unwrap(), 4096);
        assert_eq!(parse_size("0").unwrap(), 0);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        for input in ["", "GB", "ten GB", "5XB", "-1GB"] {
            assert!(
                matches!(parse_size(input), Err(ConfigError::InvalidSize { .. })),
                "accepted {:?}",
                input
            );
        }
    }

    #[test]
    fn test_defaults_convert() {
        let runtime = AppConfig::default().to_runtime_config().unwrap();
        assert_eq!(runtime.cache.max_cache_size, 100 * 1024 * 1024 * 1024);
        assert_eq!(runtime.cache.cleanup_threshold_pct, 90);
        assert_eq!(runtime.worker.worker_count, 5);
        assert_eq!(runtime.worker.max_retries, 5);
        assert_eq!(runtime.worker.chunk_size, 64 * 1024);
        assert_eq!(runtime.client.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [cache]
            cache_root = "/srv/mirror"
            max_cache_size = "2TB"
            eviction_interval = "5m"

            [worker]
            workers = 12
            chunk_size = "1MB"

            [client]
            request_timeout = "45s"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.cache_root, PathBuf::from("/srv/mirror"));
        assert_eq!(config.cache.cleanup_threshold, 90);
        assert_eq!(config.cache.eviction_interval, Duration::from_secs(300));
        assert_eq!(config.worker.workers, 12);
        assert_eq!(config.worker.max_retries, 5);
        assert_eq!(config.logging.level, "warn");

        let runtime = config.to_runtime_config().unwrap();
        assert_eq!(runtime.worker.chunk_size, 1024 * 1024);
        assert_eq!(runtime.client.request_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_overrides_win() {
        let mut config = AppConfig::default();
        config.apply_overrides(&ConfigOverrides {
            cache_root: Some(PathBuf::from("/tmp/cache")),
            max_cache_size: Some("1GB".to_string()),
            workers: Some(2),
            request_timeout: Some(Duration::from_secs(5)),
            force_verify: true,
            ..Default::default()
        });

        let runtime = config.to_runtime_config().unwrap();
        assert_eq!(runtime.cache.cache_root, PathBuf::from("/tmp/cache"));
        assert_eq!(runtime.cache.max_cache_size, 1 << 30);
        assert_eq!(runtime.worker.worker_count, 2);
        assert!(runtime.worker.force_verify);
        assert_eq!(runtime.client.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.worker.workers = 0;
        assert!(config.to_runtime_config().is_err());

        let mut config = AppConfig::default();
        config.cache.cleanup_threshold = 150;
        assert!(config.to_runtime_config().is_err());

        let mut config = AppConfig::default();
        config.cache.eviction_target = Some(95);
        assert!(config.to_runtime_config().is_err());

        let mut config = AppConfig::default();
        config.worker.chunk_size = "0".to_string();
        assert!(config.to_runtime_config().is_err());
    }

    #[tokio::test]
    async fn test_load_explicit_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        tokio::fs::write(&path, "[worker]\nworkers = 3\n").await.unwrap();

        let config = AppConfig::load(Some(&path)).await.unwrap();
        assert_eq!(config.worker.workers, 3);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            AppConfig::load(Some(&missing)).await,
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_toml_rejected() {
        assert!(matches!(
            AppConfig::from_toml("[worker]\nworkers = \"many\""),
            Err(ConfigError::InvalidFormat(_))
        ));
    }
}
