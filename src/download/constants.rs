//! Constants for the download module (timeouts, checkpointing, retry caps).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default minimum interval between durable state checkpoints of one transfer.
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_millis(500);

/// Write buffer in front of the partial file.
pub const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Suffix appended to the destination file name while a transfer is incomplete.
pub const PARTIAL_SUFFIX: &str = ".part";
