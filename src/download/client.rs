//! HTTP client wrapper shared by every transfer.
//!
//! Built once per run so connections are pooled across transfers. The client
//! never negotiates compressed encodings: resume offsets are byte offsets into
//! the stored representation.

use std::time::Duration;

use reqwest::header::{
    ACCEPT_ENCODING, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, ETAG, HeaderMap,
    HeaderValue, LAST_MODIFIED, RETRY_AFTER,
};
use reqwest::{Client, Response};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::TransferError;
use crate::user_agent;

/// What a HEAD probe learned about a remote resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMeta {
    /// Declared size, from `Content-Length`.
    pub total_size: Option<u64>,
    /// `ETag`, else `Last-Modified`.
    pub validator: Option<String>,
    /// Whether the server advertised `Accept-Ranges: bytes`.
    pub accepts_ranges: bool,
    /// Raw `Content-Disposition` header.
    pub content_disposition: Option<String>,
    /// URL the response came from, after redirects.
    pub final_url: Option<Url>,
}

/// HTTP client with connect/read timeouts and a fixed User-Agent.
///
/// # Example
///
/// ```no_run
/// use fetchall_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new()?;
/// let url = url::Url::parse("https://example.com/file.iso")?;
/// let meta = client.probe(&url, &Default::default()).await?;
/// println!("size: {:?}", meta.total_size);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Creates a client with default timeouts (30 s connect, 300 s read).
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::new_with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates a client with explicit timeouts.
    ///
    /// `read_timeout` bounds the gap between body reads, not the whole transfer.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialized.
    pub fn new_with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .default_headers(default_headers)
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self { client })
    }

    /// Sends a GET with the caller's headers, without interpreting the status.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Network`] or [`TransferError::Timeout`] when no
    /// response headers arrive.
    #[instrument(level = "debug", skip(self, headers), fields(url = %url))]
    pub async fn get(&self, url: &Url, headers: &HeaderMap) -> Result<Response, TransferError> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| TransferError::network(url.as_str(), e))?;
        debug!(status = response.status().as_u16(), "received response headers");
        Ok(response)
    }

    /// Issues a HEAD request and reports size, validator, and range support.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ServerError`] for non-success statuses and
    /// network errors as for [`HttpClient::get`].
    #[instrument(level = "debug", skip(self, headers), fields(url = %url))]
    pub async fn probe(&self, url: &Url, headers: &HeaderMap) -> Result<RemoteMeta, TransferError> {
        let response = self
            .client
            .head(url.clone())
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| TransferError::network(url.as_str(), e))?;

        if !response.status().is_success() {
            return Err(server_error(url, &response));
        }

        let response_headers = response.headers();
        let meta = RemoteMeta {
            total_size: content_length(response_headers),
            validator: validator_from(response_headers),
            accepts_ranges: response_headers
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("bytes")),
            content_disposition: response_headers
                .get(CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            final_url: Some(response.url().clone()),
        };
        debug!(
            total_size = ?meta.total_size,
            validator = ?meta.validator,
            accepts_ranges = meta.accepts_ranges,
            "probed remote resource"
        );
        Ok(meta)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Maps a non-success response to [`TransferError::ServerError`], keeping Retry-After.
pub(crate) fn server_error(url: &Url, response: &Response) -> TransferError {
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(std::string::ToString::to_string);
    TransferError::server(url.as_str(), response.status().as_u16(), retry_after)
}

/// `ETag` when present, otherwise `Last-Modified`.
pub(crate) fn validator_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .or_else(|| headers.get(LAST_MODIFIED))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
