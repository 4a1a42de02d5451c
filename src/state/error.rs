//! Error types for transfer state persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading, saving, or deleting transfer state records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading, writing, renaming, or syncing a record file failed.
    #[error("state store IO error on {path}: {source}")]
    Io {
        /// The record (or temporary) file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded.
    #[error("failed to encode transfer state for {path}: {source}")]
    Encode {
        /// The record file path.
        path: PathBuf,
        /// The underlying serialization error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Creates an IO error bound to the file it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an encode error bound to the record it was meant for.
    pub fn encode(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Encode {
            path: path.into(),
            source,
        }
    }
}

/// Result type for state store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display_contains_path() {
        let error = StoreError::io(
            "/tmp/state/abc.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = error.to_string();
        assert!(msg.contains("/tmp/state/abc.json"), "got: {msg}");
        assert!(msg.contains("denied"), "got: {msg}");
    }
}
