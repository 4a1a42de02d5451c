//! Transfer state records and their identifying keys.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Major version written into every record. Records with a higher major
/// version were produced by a newer release and are not interpreted.
pub const FORMAT_VERSION: u32 = 1;

/// Stable identifier of a transfer across runs, derived from URL + destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferKey(String);

impl TransferKey {
    /// Derives the key as hex SHA-256 of `"{url}\n{destination}"`.
    #[must_use]
    pub fn new(url: &str, destination: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(b"\n");
        hasher.update(destination.to_string_lossy().as_bytes());
        let digest = hasher.finalize();
        let hex = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        Self(hex)
    }

    /// Returns the key as a string slice (64 lowercase hex chars).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a persisted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Known but not started.
    Pending,
    /// Bytes are being fetched.
    InProgress,
    /// Interrupted; resumable from `bytes_completed`.
    Paused,
    /// Destination file is complete.
    Completed,
    /// Gave up; not resumed by later runs.
    Failed,
}

impl TransferStatus {
    /// Returns the persisted string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether a record in this status may continue from its checkpoint.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::InProgress | Self::Paused)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable snapshot of one transfer.
///
/// `bytes_completed` never exceeds `total_size` when the size is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferState {
    /// Record layout version.
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    /// Source URL.
    pub url: String,
    /// Final destination path.
    pub destination: PathBuf,
    /// Total size when the server declared one.
    pub total_size: Option<u64>,
    /// Bytes durably written to the partial file.
    pub bytes_completed: u64,
    /// `ETag` or `Last-Modified` observed when the bytes were fetched.
    pub validator: Option<String>,
    /// Current status.
    pub status: TransferStatus,
    /// Last update, milliseconds since the Unix epoch.
    pub updated_at_unix_ms: u64,
}

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

impl TransferState {
    /// Creates a fresh `Pending` record.
    #[must_use]
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            url: url.into(),
            destination: destination.into(),
            total_size: None,
            bytes_completed: 0,
            validator: None,
            status: TransferStatus::Pending,
            updated_at_unix_ms: now_unix_ms(),
        }
    }

    /// Discards all progress: zero bytes, no validator, unknown size.
    pub fn reset(&mut self) {
        self.bytes_completed = 0;
        self.total_size = None;
        self.validator = None;
        self.status = TransferStatus::InProgress;
        self.touch();
    }

    /// Refreshes `updated_at_unix_ms`.
    pub fn touch(&mut self) {
        self.updated_at_unix_ms = now_unix_ms();
    }
}

#[allow(clippy::cast_possible_truncation)]
fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
