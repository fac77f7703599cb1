//! Chunked, resumable transfer into a staging file
//!
//! Bytes are appended to the `.partial` file in slices of at most
//! `chunk_size`; each slice is flushed and synced before the next is written,
//! so whatever is on disk after a crash is a valid prefix of the blob and the
//! next attempt resumes from the file's length.

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};
use url::Url;

use crate::app::client::http::HttpHandler;
use crate::app::coordinator::signals::ShutdownToken;
use crate::errors::{DownloadError, DownloadResult};

/// One transfer attempt
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    /// Blob location
    pub url: &'a Url,
    /// Staging file receiving the bytes
    pub partial: &'a Path,
    /// Bytes of the blob already in the staging file
    pub offset: u64,
    /// Total bytes the blob should have, when known
    pub expected_len: Option<u64>,
    /// Largest slice written between syncs
    pub chunk_size: usize,
}

/// What a completed transfer attempt did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferReport {
    /// Offset the response body started at
    pub start_offset: u64,
    /// Bytes written by this attempt
    pub bytes_written: u64,
    /// Length of the staging file afterwards
    pub final_len: u64,
    /// The server ignored the range request and the file was restarted
    pub restarted: bool,
    /// Bytes the server sent past the expected length (discarded)
    pub truncated_excess: u64,
}

/// File download operations handler
pub struct DownloadHandler<'a> {
    http_handler: &'a HttpHandler,
}

impl<'a> DownloadHandler<'a> {
    /// Creates a new DownloadHandler with the given HTTP handler
    pub fn new(http_handler: &'a HttpHandler) -> Self {
        Self { http_handler }
    }

    /// Stream the blob into the staging file, starting at `request.offset`
    ///
    /// If the server answers a ranged request with the whole blob, the staging
    /// file is truncated and rewritten from byte 0. Bytes beyond
    /// `expected_len` are discarded. Cancellation is checked between reads;
    /// the last chunk written is always synced first.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Interrupted` on shutdown,
    /// `DownloadError::IncompleteDownload` when the body ends early,
    /// `DownloadError::Timeout` when a read stalls, and any error from the
    /// request itself or the staging file.
    pub async fn transfer(
        &self,
        request: TransferRequest<'_>,
        shutdown: &ShutdownToken,
    ) -> DownloadResult<TransferReport> {
        if request.chunk_size == 0 {
            return Err(DownloadError::ConfigurationError(
                "chunk size must be greater than zero".to_string(),
            ));
        }

        let ranged = self
            .http_handler
            .get_from(request.url, request.offset)
            .await?;
        let start = ranged.start_offset;
        let mut response = ranged.response;

        let restarted = request.offset > 0 && start == 0;
        if restarted {
            warn!(
                "Server ignored range request for {} at byte {}, restarting from byte 0",
                request.url, request.offset
            );
        }

        let body_len = response.content_length();

        if let Some(parent) = request.partial.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(request.partial)
            .await?;
        file.set_len(start).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut report = TransferReport {
            start_offset: start,
            restarted,
            ..Default::default()
        };
        let mut position = start;
        let read_timeout = self.http_handler.request_timeout();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    file.flush().await?;
                    file.sync_data().await?;
                    debug!(
                        "Transfer of {} interrupted at byte {}",
                        request.url, position
                    );
                    return Err(DownloadError::Interrupted);
                }
                next = tokio::time::timeout(read_timeout, response.chunk()) => next,
            };

            let chunk = match next {
                Err(_) => {
                    return Err(DownloadError::Timeout {
                        seconds: read_timeout.as_secs(),
                    })
                }
                Ok(result) => result?,
            };
            let Some(chunk) = chunk else {
                break;
            };

            let allowed = match request.expected_len {
                Some(limit) => usize::try_from(limit.saturating_sub(position))
                    .unwrap_or(usize::MAX)
                    .min(chunk.len()),
                None => chunk.len(),
            };
            report.truncated_excess += (chunk.len() - allowed) as u64;

            for slice in chunk[..allowed].chunks(request.chunk_size) {
                file.write_all(slice).await?;
                file.flush().await?;
                file.sync_data().await?;
                position += slice.len() as u64;
                report.bytes_written += slice.len() as u64;
            }

            if report.truncated_excess > 0 {
                break;
            }
        }

        report.final_len = position;

        if report.truncated_excess > 0 {
            warn!(
                "Server sent more than the expected {} bytes for {}, discarded the excess",
                request.expected_len.unwrap_or(position),
                request.url
            );
        }

        if let Some(expected) = request.expected_len {
            if position < expected {
                return Err(DownloadError::IncompleteDownload {
                    received: position,
                    expected,
                });
            }
        } else if let Some(body_len) = body_len {
            if report.bytes_written < body_len {
                return Err(DownloadError::IncompleteDownload {
                    received: start + report.bytes_written,
                    expected: start + body_len,
                });
            }
        }

        debug!(
            "Transferred {} bytes of {} (offset {} -> {})",
            report.bytes_written, request.url, start, position
        );
        Ok(report)
    }
}
