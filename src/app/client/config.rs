//! HTTP client configuration and building logic

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::constants::http;
use crate::errors::{DownloadError, DownloadResult};

/// Configuration for the blob HTTP client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Time allowed for the response head and for each body read
    pub request_timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// TCP keep-alive settings
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum number of idle connections per host
    pub pool_max_per_host: usize,
    /// Rate limit in requests per second (0 = unlimited)
    pub rate_limit_rps: u32,
}

impl Default for ClientConfig {
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

impl ClientConfig {
    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the request rate limit (0 = unlimited)
    pub fn with_rate_limit(mut self, rps: u32) -> Self {
        self.rate_limit_rps = rps;
        self
    }

    /// Builds the HTTP client with the specified configuration
    ///
    /// No overall request timeout is set on the client: large blobs may take
    /// far longer than `request_timeout` in total, so the timeout is applied
    /// to the response head and to each body read instead.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Http` if the TLS backend cannot be initialized.
    pub fn build_http_client(&self) -> DownloadResult<Client> {
        let mut client_builder = Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(http::USER_AGENT)
            .tcp_nodelay(self.tcp_nodelay)
            .pool_max_idle_per_host(self.pool_max_per_host);

        if let Some(keepalive) = self.tcp_keepalive {
            client_builder = client_builder.tcp_keepalive(keepalive);
        }

        if let Some(idle_timeout) = self.pool_idle_timeout {
            client_builder = client_builder.pool_idle_timeout(idle_timeout);
        }

        client_builder.build().map_err(DownloadError::Http)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::ConfigurationError` for a zero timeout.
    pub fn validate(&self) -> DownloadResult<()> {
        if self.request_timeout.is_zero() {
            return Err(DownloadError::ConfigurationError(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
