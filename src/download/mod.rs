//! HTTP side of a transfer: client, range fetcher, retry policy, errors.
//!
//! # Features
//!
//! - Range requests guarded by `If-Range` so a changed resource is never spliced
//! - Streaming bodies into a caller-supplied [`ChunkSink`]
//! - Configurable timeouts (30s connect, 5min read by default)
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use fetchall_core::download::{FetchRequest, HttpClient, RangeFetcher};
//!
//! # async fn example(sink: &mut dyn fetchall_core::download::ChunkSink) -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = RangeFetcher::new(HttpClient::new()?);
//! let request = FetchRequest {
//!     url: url::Url::parse("https://example.com/file.iso")?,
//!     headers: Default::default(),
//!     start_offset: 4_194_304,
//!     validator: Some("\"abc123\"".to_string()),
//! };
//! let outcome = fetcher
//!     .fetch(&request, sink, &tokio_util::sync::CancellationToken::new())
//!     .await;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod error;
mod fetcher;
mod retry;

pub use client::{HttpClient, RemoteMeta};
pub use error::TransferError;
pub use fetcher::{ChunkProgress, ChunkSink, FetchOutcome, FetchRequest, RangeFetcher, ResponseMeta};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
    parse_retry_after, retry_after_delay,
};

// Note: no module-local Result aliases here.
// Use `Result<T, TransferError>` explicitly in function signatures.
