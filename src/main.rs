//! CLI entry point for fetchall.

use std::process::ExitCode;

mod app;
mod cli;

/// How the process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every transfer completed.
    Success,
    /// Transfers failed and none completed, or the run could not start.
    Failure,
    /// Cancelled; rerunning resumes the paused transfers.
    Interrupted,
    /// Some transfers completed, some failed.
    Partial,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Interrupted => 2,
            Self::Partial => 3,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match app::runtime::run_fetchall().await {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}
