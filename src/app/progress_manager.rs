//! Progress UI for download runs, driven by scheduler events.

use std::collections::HashMap;

use fetchall_core::{AggregateProgress, RunSummary, SchedulerEvent, TransferId, TransferOutcome};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

/// Renders the run as a single byte-level bar plus one line per finished transfer.
pub(crate) struct ProgressView {
    bar: ProgressBar,
    quiet: bool,
    names: HashMap<TransferId, String>,
}

impl ProgressView {
    /// A visible bar when `use_bar`, otherwise a hidden one that still tracks state.
    pub(crate) fn new(use_bar: bool, quiet: bool) -> Self {
        let bar = if use_bar {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::with_template(
                    "{spinner} [{elapsed_precise}] [{wide_bar}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        Self {
            bar,
            quiet,
            names: HashMap::new(),
        }
    }

    pub(crate) fn handle(&mut self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::Admitted {
                transfer_id,
                destination,
                ..
            } => {
                let name = destination.file_name().map_or_else(
                    || destination.display().to_string(),
                    |name| name.to_string_lossy().into_owned(),
                );
                self.names.insert(*transfer_id, name);
            }
            SchedulerEvent::Aggregate(aggregate) => self.apply(aggregate),
            SchedulerEvent::Reset {
                transfer_id,
                bytes_discarded,
                reason,
            } => {
                self.line(format!(
                    "restarting {} from zero (discarded {}): {reason}",
                    self.name(*transfer_id),
                    HumanBytes(*bytes_discarded)
                ));
            }
            SchedulerEvent::Finished(report) => {
                let name = self.name(report.transfer_id);
                match &report.outcome {
                    TransferOutcome::Completed => {
                        self.line(format!("done    {name} ({})", HumanBytes(report.bytes_completed)));
                    }
                    TransferOutcome::Paused => {
                        self.line(format!(
                            "paused  {name} at {}",
                            HumanBytes(report.bytes_completed)
                        ));
                    }
                    TransferOutcome::Failed { cause, .. } => {
                        self.line(format!("failed  {}: {cause}", report.url));
                    }
                }
            }
            SchedulerEvent::Progress(_) | SchedulerEvent::Summary(_) => {}
        }
    }

    /// Clears the bar and prints the final tally.
    pub(crate) fn finish(&self, summary: &RunSummary, rejected: usize) {
        self.bar.finish_and_clear();
        if !self.quiet {
            eprintln!(
                "{} completed, {} failed, {} paused, {} not started",
                summary.completed,
                summary.failed + rejected,
                summary.paused,
                summary.not_started
            );
        }
        for failure in &summary.failures {
            eprintln!(
                "  {} -> {}: [{}] {}",
                failure.url,
                failure.destination.display(),
                failure.kind,
                failure.cause
            );
        }
        if summary.was_interrupted() && !self.quiet {
            eprintln!("run again with the same inputs to resume");
        }
    }

    fn apply(&self, aggregate: &AggregateProgress) {
        let length = aggregate.total_bytes_known.max(aggregate.total_bytes_completed);
        self.bar.set_length(length);
        self.bar.set_position(aggregate.total_bytes_completed);
        self.bar.set_message(format!(
            "{} active, {} queued, {} done{}",
            aggregate.active_count,
            aggregate.queued_count,
            aggregate.completed_count,
            if aggregate.total_is_lower_bound { " (size partly unknown)" } else { "" }
        ));
    }

    fn name(&self, transfer_id: TransferId) -> String {
        self.names
            .get(&transfer_id)
            .cloned()
            .unwrap_or_else(|| format!("#{transfer_id}"))
    }

    fn line(&self, message: String) {
        if !self.quiet {
            self.bar.suspend(|| eprintln!("{message}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_aggregate_moves_hidden_bar() {
        let mut view = ProgressView::new(false, true);
        view.handle(&SchedulerEvent::Aggregate(AggregateProgress {
            total_bytes_known: 1000,
            total_bytes_completed: 250,
            active_count: 1,
            ..AggregateProgress::default()
        }));
        assert_eq!(view.bar.length(), Some(1000));
        assert_eq!(view.bar.position(), 250);
    }

    #[test]
    fn test_bar_length_never_below_position() {
        let mut view = ProgressView::new(false, true);
        view.handle(&SchedulerEvent::Aggregate(AggregateProgress {
            total_bytes_known: 10,
            total_bytes_completed: 40,
            total_is_lower_bound: true,
            ..AggregateProgress::default()
        }));
        assert_eq!(view.bar.length(), Some(40));
    }

    #[test]
    fn test_admitted_names_come_from_destination() {
        let mut view = ProgressView::new(false, true);
        view.handle(&SchedulerEvent::Admitted {
            transfer_id: 7,
            url: "https://example.com/a".to_string(),
            destination: PathBuf::from("/tmp/out/a.iso"),
        });
        assert_eq!(view.name(7), "a.iso");
        assert_eq!(view.name(8), "#8");
    }
}
