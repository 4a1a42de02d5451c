//! Run-wide progress as a projection of per-transfer snapshots.
//!
//! The book keeps the latest snapshot of every admitted transfer, finished
//! ones included, and [`ProgressBook::aggregate`] recomputes the totals from
//! scratch. Nothing is counted incrementally, so a late or duplicate tick can
//! never skew the totals.

use std::collections::BTreeMap;

use crate::transfer::{TransferId, TransferOutcome};

/// Totals across all transfers of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateProgress {
    /// Sum of the known total sizes.
    pub total_bytes_known: u64,
    /// Some size is still unknown, so the real total may be larger.
    pub total_is_lower_bound: bool,
    /// Sum of bytes held by every admitted transfer.
    pub total_bytes_completed: u64,
    /// Transfers currently running.
    pub active_count: usize,
    /// Transfers that finished successfully.
    pub completed_count: usize,
    /// Transfers that failed (refused duplicates included).
    pub failed_count: usize,
    /// Transfers paused by cancellation.
    pub paused_count: usize,
    /// Requests not admitted yet.
    pub queued_count: usize,
    /// Times a transfer discarded its bytes and restarted.
    pub resets: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Completed,
    Failed,
    Paused,
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    bytes_completed: u64,
    total_size: Option<u64>,
    phase: Phase,
}

/// Latest snapshot per transfer. Owned by the scheduler's driver task.
#[derive(Debug, Default)]
pub(crate) struct ProgressBook {
    entries: BTreeMap<TransferId, Snapshot>,
    resets: u64,
}

impl ProgressBook {
    pub(crate) fn admit(&mut self, id: TransferId) {
        self.entries.insert(
            id,
            Snapshot {
                bytes_completed: 0,
                total_size: None,
                phase: Phase::Active,
            },
        );
    }

    /// Records a refused request that never ran.
    pub(crate) fn refuse(&mut self, id: TransferId) {
        self.entries.insert(
            id,
            Snapshot {
                bytes_completed: 0,
                total_size: Some(0),
                phase: Phase::Failed,
            },
        );
    }

    /// Whether ticks for `id` should still be applied.
    pub(crate) fn is_active(&self, id: TransferId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.phase == Phase::Active)
    }

    pub(crate) fn progress(&mut self, id: TransferId, bytes_completed: u64, total_size: Option<u64>) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.bytes_completed = bytes_completed;
            if total_size.is_some() {
                entry.total_size = total_size;
            }
        }
    }

    pub(crate) fn reset(&mut self, id: TransferId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.bytes_completed = 0;
            entry.total_size = None;
        }
        self.resets += 1;
    }

    pub(crate) fn bytes_completed(&self, id: TransferId) -> (u64, Option<u64>) {
        self.entries
            .get(&id)
            .map_or((0, None), |entry| (entry.bytes_completed, entry.total_size))
    }

    pub(crate) fn finish(
        &mut self,
        id: TransferId,
        outcome: &TransferOutcome,
        bytes_completed: u64,
        total_size: Option<u64>,
    ) {
        let phase = match outcome {
            TransferOutcome::Completed => Phase::Completed,
            TransferOutcome::Failed { .. } => Phase::Failed,
            TransferOutcome::Paused => Phase::Paused,
        };
        let entry = self.entries.entry(id).or_insert(Snapshot {
            bytes_completed: 0,
            total_size: None,
            phase,
        });
        entry.phase = phase;
        entry.bytes_completed = entry.bytes_completed.max(bytes_completed);
        if total_size.is_some() {
            entry.total_size = total_size;
        }
    }

    /// Recomputes the totals; `queued` is the number of requests not yet admitted.
    pub(crate) fn aggregate(&self, queued: usize) -> AggregateProgress {
        let mut aggregate = AggregateProgress {
            queued_count: queued,
            total_is_lower_bound: queued > 0,
            resets: self.resets,
            ..AggregateProgress::default()
        };

        for entry in self.entries.values() {
            aggregate.total_bytes_completed += entry.bytes_completed;
            match entry.total_size {
                Some(size) => aggregate.total_bytes_known += size,
                None if entry.phase != Phase::Failed => aggregate.total_is_lower_bound = true,
                None => {}
            }
            match entry.phase {
                Phase::Active => aggregate.active_count += 1,
                Phase::Completed => aggregate.completed_count += 1,
                Phase::Failed => aggregate.failed_count += 1,
                Phase::Paused => aggregate.paused_count += 1,
            }
        }

        aggregate
    }
}
