//! Ranged GET requests with rate limiting and status classification
//!
//! Every request goes through the optional rate limiter, is bounded by the
//! request timeout until the response head arrives, and has its status mapped
//! onto the transient/fatal error classes before any body is read.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Jitter, Quota, RateLimiter,
};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;
use url::Url;

use crate::errors::{DownloadError, DownloadResult};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A successful response positioned at a known byte offset
#[derive(Debug)]
pub struct RangedResponse {
    /// Response whose body starts at `start_offset`
    pub response: Response,
    /// Byte offset of the first body byte within the blob
    pub start_offset: u64,
}

impl RangedResponse {
    /// Whether the server honored a request to start past byte 0
    pub fn is_partial(&self) -> bool {
        self.start_offset > 0
    }
}

/// HTTP operations handler
#[derive(Debug)]
pub struct HttpHandler {
    client: Client,
    rate_limiter: Option<DirectRateLimiter>,
    request_timeout: Duration,
}

impl HttpHandler {
    /// Creates a new HttpHandler
    ///
    /// # Arguments
    ///
    /// * `client` - The HTTP client to use for requests
    /// * `rate_limit_rps` - Requests per second, 0 for no limit
    /// * `request_timeout` - Time allowed for the response head
    pub fn new(client: Client, rate_limit_rps: u32, request_timeout: Duration) -> Self {
        Self {
            client,
            rate_limiter: NonZeroU32::new(rate_limit_rps)
                .map(|rps| RateLimiter::direct(Quota::per_second(rps))),
            request_timeout,
        }
    }

    /// Time allowed for the response head and for each body read
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// GET `url`, asking for the bytes from `offset` onward
    ///
    /// With `offset == 0` a plain GET is sent. Otherwise a `Range: bytes=N-`
    /// header is added and the response is checked:
    ///
    /// - `206` whose `Content-Range` starts at `offset`: body continues the blob
    /// - `200`, or `206` starting at byte 0: the server ignored the range;
    ///   body starts at byte 0
    /// - `206` starting anywhere else: [`DownloadError::RangeNotHonored`]
    /// - `416`: [`DownloadError::RangeNotSatisfiable`]
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` for connection failures, a response head that
    /// does not arrive within the request timeout, and unsuccessful statuses
    /// (classified by [`DownloadError::from_status`]).
    pub async fn get_from(&self, url: &Url, offset: u64) -> DownloadResult<RangedResponse> {
        if let Some(limiter) = &self.rate_limiter {
            limiter
                .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
                .await;
        }

        let mut request = self.client.get(url.as_str());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let response = tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| DownloadError::Timeout {
                seconds: self.request_timeout.as_secs(),
            })??;

        let status = response.status();
        debug!("GET {} (offset {}) -> {}", url, offset, status);

        match status {
            StatusCode::PARTIAL_CONTENT => match content_range_start(&response) {
                Some(start) if start == offset || start == 0 => Ok(RangedResponse {
                    response,
                    start_offset: start,
                }),
                _ => Err(DownloadError::RangeNotHonored { offset }),
            },
            StatusCode::RANGE_NOT_SATISFIABLE => Err(DownloadError::RangeNotSatisfiable { offset }),
            status if status.is_success() => Ok(RangedResponse {
                response,
                start_offset: 0,
            }),
            status => Err(DownloadError::from_status(status.as_u16(), url.as_str())),
        }
    }

    /// Get a reference to the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// First byte position of a `Content-Range: bytes START-END/TOTAL` header
fn content_range_start(response: &Response) -> Option<u64> {
    let value = response.headers().get(CONTENT_RANGE)?.to_str().ok()?;
    parse_content_range_start(value)
}

fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}
