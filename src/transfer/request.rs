//! Immutable description of one URL to fetch.

use std::path::{Path, PathBuf};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::download::TransferError;
use crate::state::TransferKey;

/// Per-run index of a request, in input order.
pub type TransferId = usize;

/// A URL, where to store it, and any extra request headers.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    url: Url,
    destination: PathBuf,
    headers: HeaderMap,
}

impl TransferRequest {
    /// Validates `url` (absolute http/https) and pairs it with `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidUrl`] for unparseable or non-HTTP URLs.
    pub fn new(url: &str, destination: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let parsed = Url::parse(url.trim()).map_err(|_| TransferError::invalid_url(url))?;
        Self::from_url(parsed, destination)
    }

    /// Like [`TransferRequest::new`] for an already parsed URL.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidUrl`] unless the scheme is http or https.
    pub fn from_url(url: Url, destination: impl Into<PathBuf>) -> Result<Self, TransferError> {
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(TransferError::invalid_url(url.as_str()));
        }
        Ok(Self {
            url,
            destination: destination.into(),
            headers: HeaderMap::new(),
        })
    }

    /// Adds a header sent with every request of this transfer.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidHeader`] if the name or value is not valid HTTP.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, TransferError> {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| TransferError::invalid_header(name))?;
        let header_value =
            HeaderValue::from_str(value.trim()).map_err(|_| TransferError::invalid_header(name))?;
        self.headers.append(header_name, header_value);
        Ok(self)
    }

    /// Source URL.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Final destination path.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Caller-supplied headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Stable key of this request in the state store.
    #[must_use]
    pub fn key(&self) -> TransferKey {
        TransferKey::new(self.url.as_str(), &self.destination)
    }
}
