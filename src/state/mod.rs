//! Durable per-transfer state.
//!
//! One record per [`TransferKey`], written on range acquisition, throttled
//! checkpoints, resets, and terminal transitions. Completed records are pruned
//! once the destination file is in place.

mod error;
mod record;
mod store;

pub use error::{Result, StoreError};
pub use record::{FORMAT_VERSION, TransferKey, TransferState, TransferStatus};
pub use store::{JsonStateStore, StateStore};
