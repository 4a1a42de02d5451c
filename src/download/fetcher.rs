//! Range-aware fetch of a single URL into a [`ChunkSink`].
//!
//! One call to [`RangeFetcher::fetch`] is one HTTP attempt. It asks for the
//! bytes from `start_offset` onward, checks the server actually honored the
//! range, streams the body chunk by chunk, and reports what happened as a
//! [`FetchOutcome`]. Retrying, resetting, and persisting are the caller's job.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, HeaderMap, HeaderValue, IF_RANGE, RANGE};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use super::client::{HttpClient, content_length, server_error, validator_from};
use super::error::TransferError;

/// Parameters of one fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Resource to fetch.
    pub url: Url,
    /// Caller-supplied headers, sent verbatim.
    pub headers: HeaderMap,
    /// First byte wanted; `0` means the whole resource.
    pub start_offset: u64,
    /// Validator recorded when the existing bytes were fetched.
    pub validator: Option<String>,
}

/// Response facts the sink needs before the first chunk arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    /// HTTP status of the response.
    pub status: u16,
    /// Offset the body starts at.
    pub start_offset: u64,
    /// Total resource size when the server declared one.
    pub total_size: Option<u64>,
    /// `ETag`, else `Last-Modified`.
    pub validator: Option<String>,
}

/// Cumulative progress after a chunk was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    /// Bytes of the resource now held by the sink (including `start_offset`).
    pub bytes_completed: u64,
    /// Total resource size when known.
    pub total_size: Option<u64>,
}

/// Destination of fetched bytes.
#[async_trait]
pub trait ChunkSink: Send {
    /// Called once the response headers were accepted, before any chunk.
    async fn begin(&mut self, meta: &ResponseMeta) -> Result<(), TransferError>;

    /// Appends one chunk.
    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError>;

    /// Called after every written chunk with cumulative progress.
    async fn record_progress(&mut self, progress: ChunkProgress) -> Result<(), TransferError>;

    /// Pushes buffered bytes to durable storage.
    async fn flush(&mut self) -> Result<(), TransferError>;
}

/// Result of one fetch attempt.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The whole remaining body was written and flushed.
    Completed {
        /// Bytes held by the sink.
        bytes_completed: u64,
        /// Declared size (or the byte count when undeclared).
        total_size: Option<u64>,
    },
    /// The attempt failed; nothing more was written after the failing point.
    Failed(TransferError),
    /// The server would not continue from `start_offset`. Nothing was written.
    ResumeRejected {
        /// Status the ranged request was answered with.
        status: u16,
    },
    /// The cancellation token fired while waiting for data.
    Cancelled {
        /// Bytes written to the sink so far.
        bytes_completed: u64,
    },
}

/// Issues ranged GET requests and streams their bodies.
#[derive(Debug, Clone)]
pub struct RangeFetcher {
    client: HttpClient,
}

impl RangeFetcher {
    /// Creates a fetcher over a shared client.
    #[must_use]
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// Runs one fetch attempt.
    #[instrument(skip(self, sink, cancel), fields(url = %request.url, start = request.start_offset))]
    pub async fn fetch(
        &self,
        request: &FetchRequest,
        sink: &mut dyn ChunkSink,
        cancel: &CancellationToken,
    ) -> FetchOutcome {
        match self.fetch_inner(request, sink, cancel).await {
            Ok(outcome) => outcome,
            Err(error) => FetchOutcome::Failed(error),
        }
    }

    async fn fetch_inner(
        &self,
        request: &FetchRequest,
        sink: &mut dyn ChunkSink,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, TransferError> {
        let url = &request.url;
        let start = request.start_offset;
        let ranged = start > 0;

        let mut headers = request.headers.clone();
        if ranged {
            let range = HeaderValue::from_str(&format!("bytes={start}-"))
                .map_err(|_| TransferError::invalid_header(RANGE.as_str()))?;
            headers.insert(RANGE, range);
            if let Some(validator) = &request.validator {
                if is_weak_etag(validator) {
                    debug!(validator, "weak validator, sending Range without If-Range");
                } else {
                    match HeaderValue::from_str(validator) {
                        Ok(value) => {
                            headers.insert(IF_RANGE, value);
                        }
                        Err(_) => warn!(validator, "stored validator is not a valid header value"),
                    }
                }
            }
        }

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Ok(FetchOutcome::Cancelled { bytes_completed: start });
            }
            response = self.client.get(url, &headers) => response?,
        };

        let status = response.status();
        let response_headers = response.headers();
        let validator = validator_from(response_headers);

        let total_size = match status {
            StatusCode::PARTIAL_CONTENT => {
                let Some((range_start, _end, total)) = response_headers
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_content_range)
                else {
                    warn!("206 response without a usable Content-Range");
                    return Ok(FetchOutcome::ResumeRejected {
                        status: status.as_u16(),
                    });
                };
                if range_start != start {
                    warn!(range_start, "server answered with a different range");
                    return Ok(FetchOutcome::ResumeRejected {
                        status: status.as_u16(),
                    });
                }
                total
            }
            StatusCode::RANGE_NOT_SATISFIABLE if ranged => {
                let remote_total = response_headers
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_unsatisfied_range);
                if remote_total == Some(start) {
                    debug!("range starts at end of resource, nothing left to fetch");
                    sink.flush().await?;
                    return Ok(FetchOutcome::Completed {
                        bytes_completed: start,
                        total_size: Some(start),
                    });
                }
                return Ok(FetchOutcome::ResumeRejected {
                    status: status.as_u16(),
                });
            }
            status if status.is_success() => {
                if ranged {
                    debug!(
                        status = status.as_u16(),
                        "range ignored, server sent full body"
                    );
                    return Ok(FetchOutcome::ResumeRejected {
                        status: status.as_u16(),
                    });
                }
                content_length(response_headers)
            }
            _ => return Err(server_error(url, &response)),
        };

        let meta = ResponseMeta {
            status: status.as_u16(),
            start_offset: start,
            total_size,
            validator,
        };
        sink.begin(&meta).await?;

        let mut bytes_completed = start;
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(bytes_completed, "fetch cancelled");
                    return Ok(FetchOutcome::Cancelled { bytes_completed });
                }
                next = stream.next() => next,
            };

            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk.map_err(|e| TransferError::network(url.as_str(), e))?;

            let after = bytes_completed + chunk.len() as u64;
            if let Some(total) = total_size
                && after > total
            {
                return Err(TransferError::size_mismatch(url.as_str(), total, after));
            }

            sink.write_chunk(&chunk).await?;
            bytes_completed = after;
            sink.record_progress(ChunkProgress {
                bytes_completed,
                total_size,
            })
            .await?;
        }

        if let Some(total) = total_size
            && bytes_completed != total
        {
            return Err(TransferError::size_mismatch(
                url.as_str(),
                total,
                bytes_completed,
            ));
        }

        sink.flush().await?;
        debug!(bytes_completed, "body complete");
        Ok(FetchOutcome::Completed {
            bytes_completed,
            total_size: total_size.or(Some(bytes_completed)),
        })
    }
}

/// Weak entity tags may not be used in `If-Range`; servers answer them with a full 200.
fn is_weak_etag(validator: &str) -> bool {
    validator.trim_start().starts_with("W/")
}

/// Parses `bytes <start>-<end>/<total|*>`.
fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (first, last) = range.trim().split_once('-')?;
    let first = first.trim().parse::<u64>().ok()?;
    let last = last.trim().parse::<u64>().ok()?;
    if last < first {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        total => {
            let total = total.parse::<u64>().ok()?;
            if last >= total {
                return None;
            }
            Some(total)
        }
    };
    Some((first, last, total))
}

/// Parses the `bytes */<total>` form sent with 416.
fn parse_unsatisfied_range(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes")?
        .trim_start()
        .strip_prefix("*/")?
        .trim()
        .parse()
        .ok()
}
