//! fetchall Core Library
//!
//! Resumable, concurrent HTTP downloads. Every transfer checkpoints its
//! progress to a durable state record, continues from the last verified byte
//! after a crash or cancellation, and restarts from zero whenever the remote
//! resource changed underneath it.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - HTTP client, range fetcher, retry policy and errors
//! - [`state`] - Durable per-transfer records (one JSON file per transfer)
//! - [`transfer`] - One URL's resume/retry/restart state machine
//! - [`scheduler`] - Bounded-concurrency runs with aggregate progress
//! - [`filename`] - Destination naming from URLs and server responses

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod filename;
pub mod scheduler;
pub mod state;
pub mod transfer;
pub(crate) mod user_agent;

#[cfg(test)]
pub mod test_support;

// Re-export commonly used types
pub use download::{
    DEFAULT_MAX_RETRIES, FailureType, HttpClient, RetryDecision, RetryPolicy, TransferError,
    classify_error,
};
pub use filename::{destination_for, filename_from_url, partial_path, remote_filename};
pub use scheduler::{
    AggregateProgress, DEFAULT_CONCURRENCY, FailureRecord, RunHandle, RunSummary, Scheduler,
    SchedulerConfig, SchedulerError, SchedulerEvent,
};
pub use state::{JsonStateStore, StateStore, StoreError, TransferKey, TransferState, TransferStatus};
pub use transfer::{
    ProgressEvent, Transfer, TransferConfig, TransferId, TransferOutcome, TransferReport,
    TransferRequest, TransferUpdate,
};
