//! Exit code logic for the fetchall process.
//!
//! Single responsibility: map a run summary to the process exit outcome.

use fetchall_core::RunSummary;

use crate::ProcessExit;

/// Determines the process exit outcome from the run summary.
///
/// `rejected` counts inputs that never became a transfer (bad URL or path).
pub(crate) fn determine_exit_outcome(summary: &RunSummary, rejected: usize) -> ProcessExit {
    let failed = summary.failed + rejected;
    if summary.was_interrupted() {
        ProcessExit::Interrupted
    } else if failed == 0 {
        ProcessExit::Success
    } else if summary.completed > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
