//! HTTP client for fetching blobs
//!
//! The module is organized into specialized components:
//! - `config`: HTTP client configuration and building
//! - `http`: Ranged requests, rate limiting and status classification
//! - `download`: Chunked, synced writes into staging files

use crate::app::coordinator::signals::ShutdownToken;
use crate::errors::DownloadResult;

pub mod config;
pub mod download;
pub mod http;

pub use config::ClientConfig;
pub use download::{TransferReport, TransferRequest};

use download::DownloadHandler;
use http::HttpHandler;

/// HTTP client used by every worker in a run
///
/// Holds one connection pool and one rate limiter shared by all transfers.
#[derive(Debug)]
pub struct BlobClient {
    http_handler: HttpHandler,
}

impl BlobClient {
    /// Creates a new client with the given configuration
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if the configuration is invalid or the HTTP
    /// client cannot be built
    pub fn new(config: &ClientConfig) -> DownloadResult<Self> {
        config.validate()?;
        let client = config.build_http_client()?;
        let http_handler = HttpHandler::new(client, config.rate_limit_rps, config.request_timeout);

        tracing::debug!(
            "Created blob client (timeout {:?}, rate limit {} rps)",
            config.request_timeout,
            config.rate_limit_rps
        );

        Ok(Self { http_handler })
    }

    /// Run one transfer attempt into a staging file
    ///
    /// See [`DownloadHandler::transfer`] for the exact semantics.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if the request or the write fails, the body is
    /// short, or shutdown is requested
    pub async fn transfer(
        &self,
        request: TransferRequest<'_>,
        shutdown: &ShutdownToken,
    ) -> DownloadResult<TransferReport> {
        DownloadHandler::new(&self.http_handler)
            .transfer(request, shutdown)
            .await
    }
}
