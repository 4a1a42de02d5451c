//! Error types for transfers.
//!
//! Every failure a single transfer can hit is a [`TransferError`]. Variants
//! carry the URL or path they relate to so the run summary can surface them
//! without extra context.

use std::path::PathBuf;

use thiserror::Error;

use crate::state::StoreError;

/// Errors that can occur while fetching, resuming, or persisting a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Network-level error (DNS resolution, connection refused, reset, early close).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL being fetched.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request or body read timed out.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Non-success HTTP response.
    #[error("HTTP {status} downloading {url}")]
    ServerError {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Raw Retry-After header value, if the server sent one.
        retry_after: Option<String>,
    },

    /// The server ignored a range request and would restart from zero.
    #[error("server rejected resume of {url} (HTTP {status})")]
    ResumeRejected {
        /// The URL being resumed.
        url: String,
        /// Status the server answered the ranged request with.
        status: u16,
    },

    /// The remote resource changed since the partial download was recorded.
    #[error("remote resource changed for {url}: expected {expected}, found {actual}")]
    ValidatorMismatch {
        /// The URL being resumed.
        url: String,
        /// Validator or size recorded by the previous run.
        expected: String,
        /// Validator or size reported by the server now.
        actual: String,
    },

    /// Body length does not match the declared size.
    #[error("size mismatch downloading {url}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// The URL being fetched.
        url: String,
        /// Declared total size.
        expected: u64,
        /// Bytes actually received (or that would have been, for overlong bodies).
        actual: u64,
    },

    /// Local file system failure on the destination or partial file.
    #[error("storage error on {path}: {source}")]
    Storage {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Transfer state could not be loaded or persisted.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The provided URL is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A caller-supplied header name or value is not valid HTTP.
    #[error("invalid header {name:?}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },

    /// Destination already exists with different content and overwriting is disabled.
    #[error("destination {path} already exists with a different size")]
    DestinationExists {
        /// The destination path.
        path: PathBuf,
    },

    /// Another request in the same run already targets this destination.
    #[error("duplicate destination {path}: already claimed by another request in this run")]
    DuplicateDestination {
        /// The contested destination path.
        path: PathBuf,
    },
}

impl TransferError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn server(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::ServerError {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a resume-rejected error.
    pub fn resume_rejected(url: impl Into<String>, status: u16) -> Self {
        Self::ResumeRejected {
            url: url.into(),
            status,
        }
    }

    /// Creates a validator mismatch error.
    pub fn validator_mismatch(
        url: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ValidatorMismatch {
            url: url.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a size mismatch error.
    pub fn size_mismatch(url: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::SizeMismatch {
            url: url.into(),
            expected,
            actual,
        }
    }

    /// Creates a storage error.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid header error.
    pub fn invalid_header(name: impl Into<String>) -> Self {
        Self::InvalidHeader { name: name.into() }
    }

    /// Short machine-readable label for summaries and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => "network",
            Self::ServerError { .. } => "server",
            Self::ResumeRejected { .. } => "resume_rejected",
            Self::ValidatorMismatch { .. } => "validator_mismatch",
            Self::SizeMismatch { .. } => "size_mismatch",
            Self::Storage { .. } | Self::Store(_) => "storage",
            Self::InvalidUrl { .. }
            | Self::InvalidHeader { .. }
            | Self::DestinationExists { .. }
            | Self::DuplicateDestination { .. } => "config",
        }
    }
}

// No From<reqwest::Error> / From<std::io::Error>: every variant needs the
// url or path, which the source errors do not carry.
