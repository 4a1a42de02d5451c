//! Bounded-concurrency scheduler for a batch of transfers.
//!
//! [`Scheduler::run`] spawns a driver task that admits requests while fewer
//! than `concurrency` transfers are active, folds their updates into a per-transfer
//! progress book, and publishes a single ordered [`SchedulerEvent`] feed.
//!
//! # Concurrency Model
//!
//! - Each transfer runs in its own Tokio task inside a `JoinSet`
//! - Transfers report over one unbounded channel; the driver is its only reader
//! - A slot frees when the driver sees the transfer's `Finished` update
//! - A panicking transfer task is reported as failed; the run continues
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fetchall_core::download::HttpClient;
//! use fetchall_core::scheduler::{Scheduler, SchedulerConfig, SchedulerEvent};
//! use fetchall_core::state::JsonStateStore;
//! use fetchall_core::transfer::TransferRequest;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(JsonStateStore::open("./downloads/.fetchall/state").await?);
//! let scheduler = Scheduler::new(SchedulerConfig::default(), store, HttpClient::new()?)?;
//! let request = TransferRequest::new("https://example.com/file.iso", "./downloads/file.iso")?;
//! let mut run = scheduler.run(vec![request]);
//! while let Some(event) = run.next_event().await {
//!     if let SchedulerEvent::Summary(summary) = event {
//!         println!("completed: {}", summary.completed);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod aggregate;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use aggregate::AggregateProgress;
use aggregate::ProgressBook;

use crate::download::{HttpClient, TransferError};
use crate::filename::partial_path;
use crate::state::StateStore;
use crate::transfer::{
    ProgressEvent, Transfer, TransferConfig, TransferId, TransferOutcome, TransferReport,
    TransferRequest, TransferUpdate,
};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Error type for scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The driver task died before producing a summary.
    #[error("scheduler driver task failed: {0}")]
    Driver(#[from] JoinError),
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum transfers running at once (1-100).
    pub concurrency: usize,
    /// Settings handed to every transfer.
    pub transfer: TransferConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            transfer: TransferConfig::default(),
        }
    }
}

/// Everything a run consumer gets to see, in order.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A request left the queue and its transfer started.
    Admitted {
        /// Which transfer.
        transfer_id: TransferId,
        /// Source URL.
        url: String,
        /// Destination path.
        destination: PathBuf,
    },
    /// Per-transfer progress tick.
    Progress(ProgressEvent),
    /// A transfer discarded bytes and restarts from zero.
    Reset {
        /// Which transfer.
        transfer_id: TransferId,
        /// Bytes dropped.
        bytes_discarded: u64,
        /// Why.
        reason: String,
    },
    /// Recomputed run-wide totals after any change.
    Aggregate(AggregateProgress),
    /// A transfer ended (or was refused).
    Finished(TransferReport),
    /// End of run. Always the last event.
    Summary(RunSummary),
}

/// One failed transfer in the summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    /// Source URL.
    pub url: String,
    /// Destination path.
    pub destination: PathBuf,
    /// Short error class.
    pub kind: &'static str,
    /// Human-readable cause.
    pub cause: String,
}

/// Final tally of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Transfers whose destination is complete.
    pub completed: usize,
    /// Transfers that failed.
    pub failed: usize,
    /// Transfers paused by cancellation.
    pub paused: usize,
    /// Requests never admitted because the run was cancelled.
    pub not_started: usize,
    /// Details of every failure, in the order they happened.
    pub failures: Vec<FailureRecord>,
}

impl RunSummary {
    /// Whether any transfer failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Whether the run stopped before every request was done.
    #[must_use]
    pub fn was_interrupted(&self) -> bool {
        self.paused > 0 || self.not_started > 0
    }

    /// Number of requests the run knew about.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.paused + self.not_started
    }

    fn record(&mut self, report: &TransferReport) {
        match &report.outcome {
            TransferOutcome::Completed => self.completed += 1,
            TransferOutcome::Paused => self.paused += 1,
            TransferOutcome::Failed { kind, cause } => {
                self.failed += 1;
                self.failures.push(FailureRecord {
                    url: report.url.clone(),
                    destination: report.destination.clone(),
                    kind: *kind,
                    cause: cause.clone(),
                });
            }
        }
    }
}

/// Runs batches of transfers with bounded concurrency.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn StateStore>,
    client: HttpClient,
}

impl Scheduler {
    /// Creates a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(config, store, client), fields(concurrency = config.concurrency))]
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn StateStore>,
        client: HttpClient,
    ) -> Result<Self, SchedulerError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(SchedulerError::InvalidConcurrency {
                value: config.concurrency,
            });
        }

        debug!(
            max_retries = config.transfer.retry_policy.max_attempts(),
            checkpoint_ms = config.transfer.checkpoint_interval.as_millis(),
            allow_resume = config.transfer.allow_resume,
            allow_overwrite = config.transfer.allow_overwrite,
            "creating scheduler"
        );

        Ok(Self {
            config,
            store,
            client,
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }

    /// Starts a run over `requests` (in order) and returns its handle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run(&self, requests: impl IntoIterator<Item = TransferRequest>) -> RunHandle {
        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            concurrency: self.config.concurrency,
            transfer_config: self.config.transfer.clone(),
            store: Arc::clone(&self.store),
            client: self.client.clone(),
            cancel: cancel.clone(),
            events: events_tx,
            updates_tx,
            updates_rx,
            pending: requests.into_iter().enumerate().collect(),
            book: ProgressBook::default(),
            tasks: JoinSet::new(),
            task_ids: HashMap::new(),
            admitted: HashMap::new(),
            active: 0,
            summary: RunSummary::default(),
        };

        RunHandle {
            events: events_rx,
            cancel,
            driver: tokio::spawn(driver.run()),
        }
    }
}

/// Handle to a running batch.
pub struct RunHandle {
    events: mpsc::UnboundedReceiver<SchedulerEvent>,
    cancel: CancellationToken,
    driver: JoinHandle<RunSummary>,
}

impl RunHandle {
    /// Next event, or `None` after [`SchedulerEvent::Summary`] was delivered.
    pub async fn next_event(&mut self) -> Option<SchedulerEvent> {
        self.events.recv().await
    }

    /// Stops admitting requests and pauses every active transfer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The run's cancellation token, e.g. for wiring to a signal handler.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the run to end. Undelivered events are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Driver`] if the driver task panicked.
    pub async fn wait(self) -> Result<RunSummary, SchedulerError> {
        Ok(self.driver.await?)
    }
}

struct Driver {
    concurrency: usize,
    transfer_config: TransferConfig,
    store: Arc<dyn StateStore>,
    client: HttpClient,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<SchedulerEvent>,
    updates_tx: mpsc::UnboundedSender<TransferUpdate>,
    updates_rx: mpsc::UnboundedReceiver<TransferUpdate>,
    pending: VecDeque<(TransferId, TransferRequest)>,
    book: ProgressBook,
    tasks: JoinSet<()>,
    task_ids: HashMap<tokio::task::Id, TransferId>,
    admitted: HashMap<TransferId, (String, PathBuf)>,
    active: usize,
    summary: RunSummary,
}

impl Driver {
    #[instrument(skip_all, fields(requests = self.pending.len(), concurrency = self.concurrency))]
    async fn run(mut self) -> RunSummary {
        info!("starting run");
        self.refuse_duplicates();

        let mut cancel_seen = false;
        loop {
            self.admit();
            let draining = self.pending.is_empty() || self.cancel.is_cancelled();
            if self.active == 0 && draining {
                break;
            }

            tokio::select! {
                Some(update) = self.updates_rx.recv() => self.handle_update(update),
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.handle_join(joined);
                }
                () = self.cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    info!(
                        active = self.active,
                        queued = self.pending.len(),
                        "cancellation requested, pausing active transfers"
                    );
                }
            }
        }

        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.handle_join(joined);
        }
        while let Ok(update) = self.updates_rx.try_recv() {
            self.handle_update(update);
        }

        self.summary.not_started = self.pending.len();
        let summary = self.summary.clone();
        info!(
            completed = summary.completed,
            failed = summary.failed,
            paused = summary.paused,
            not_started = summary.not_started,
            "run complete"
        );
        self.emit(SchedulerEvent::Summary(summary.clone()));
        summary
    }

    /// Fails every request whose destination or partial file an earlier
    /// request already claimed.
    fn refuse_duplicates(&mut self) {
        let mut claimed = HashSet::new();
        let mut refused = Vec::new();
        self.pending.retain(|(id, request)| {
            let destination = normalized(request.destination());
            let partial = partial_path(&destination);
            if claimed.contains(&destination) || claimed.contains(&partial) {
                refused.push((*id, request.clone()));
                false
            } else {
                claimed.insert(destination);
                claimed.insert(partial);
                true
            }
        });

        for (id, request) in refused {
            let error = TransferError::DuplicateDestination {
                path: request.destination().to_path_buf(),
            };
            warn!(transfer_id = id, url = %request.url(), error = %error, "refusing request");
            self.book.refuse(id);
            let report = TransferReport {
                transfer_id: id,
                url: request.url().to_string(),
                destination: request.destination().to_path_buf(),
                outcome: TransferOutcome::Failed {
                    kind: error.kind(),
                    cause: error.to_string(),
                },
                bytes_completed: 0,
                total_size: None,
                attempts: 0,
            };
            self.summary.record(&report);
            self.emit(SchedulerEvent::Finished(report));
            self.emit_aggregate();
        }
    }

    fn admit(&mut self) {
        while self.active < self.concurrency && !self.cancel.is_cancelled() {
            let Some((id, request)) = self.pending.pop_front() else {
                break;
            };

            debug!(transfer_id = id, url = %request.url(), "admitting transfer");
            let url = request.url().to_string();
            let destination = request.destination().to_path_buf();
            self.admitted.insert(id, (url.clone(), destination.clone()));
            self.book.admit(id);
            self.active += 1;
            self.emit(SchedulerEvent::Admitted {
                transfer_id: id,
                url,
                destination,
            });

            let transfer = Transfer::new(
                id,
                request,
                self.transfer_config.clone(),
                Arc::clone(&self.store),
                self.client.clone(),
                self.cancel.child_token(),
                self.updates_tx.clone(),
            );
            let handle = self.tasks.spawn(async move {
                transfer.run().await;
            });
            self.task_ids.insert(handle.id(), id);
            self.emit_aggregate();
        }
    }

    fn handle_update(&mut self, update: TransferUpdate) {
        match update {
            TransferUpdate::Progress(event) => {
                if !self.book.is_active(event.transfer_id) {
                    return;
                }
                self.book
                    .progress(event.transfer_id, event.bytes_completed, event.total_size);
                self.emit(SchedulerEvent::Progress(event));
            }
            TransferUpdate::Reset {
                transfer_id,
                bytes_discarded,
                reason,
            } => {
                if !self.book.is_active(transfer_id) {
                    return;
                }
                self.book.reset(transfer_id);
                self.emit(SchedulerEvent::Reset {
                    transfer_id,
                    bytes_discarded,
                    reason,
                });
            }
            TransferUpdate::Finished(report) => {
                if !self.book.is_active(report.transfer_id) {
                    return;
                }
                self.finish(report);
            }
        }
        self.emit_aggregate();
    }

    fn handle_join(&mut self, joined: Result<(tokio::task::Id, ()), JoinError>) {
        let task_id = match &joined {
            Ok((task_id, ())) => *task_id,
            Err(error) => error.id(),
        };
        let Some(transfer_id) = self.task_ids.remove(&task_id) else {
            return;
        };
        let Err(error) = joined else {
            return;
        };
        if !self.book.is_active(transfer_id) {
            return;
        }

        warn!(transfer_id, error = %error, "transfer task panicked");
        let (url, destination) = self
            .admitted
            .get(&transfer_id)
            .cloned()
            .unwrap_or_default();
        let (bytes_completed, total_size) = self.book.bytes_completed(transfer_id);
        self.finish(TransferReport {
            transfer_id,
            url,
            destination,
            outcome: TransferOutcome::Failed {
                kind: "panic",
                cause: format!("transfer task panicked: {error}"),
            },
            bytes_completed,
            total_size,
            attempts: 0,
        });
        self.emit_aggregate();
    }

    fn finish(&mut self, report: TransferReport) {
        self.book.finish(
            report.transfer_id,
            &report.outcome,
            report.bytes_completed,
            report.total_size,
        );
        self.active = self.active.saturating_sub(1);
        self.summary.record(&report);
        self.emit(SchedulerEvent::Finished(report));
    }

    fn emit_aggregate(&self) {
        self.emit(SchedulerEvent::Aggregate(
            self.book.aggregate(self.pending.len()),
        ));
    }

    fn emit(&self, event: SchedulerEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.events.send(event);
    }
}

/// Absolute form of `path` with `.` and `..` resolved lexically.
fn normalized(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::state::JsonStateStore;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> Arc<dyn StateStore> {
        Arc::new(JsonStateStore::open(dir.path().join("state")).await.unwrap())
    }

    #[test]
    fn test_normalized_resolves_dot_segments() {
        assert_eq!(
            normalized(Path::new("/out/./sub/../a.bin")),
            PathBuf::from("/out/a.bin")
        );
        assert!(normalized(Path::new("a.bin")).is_absolute());
        assert_eq!(normalized(Path::new("./a.bin")), normalized(Path::new("a.bin")));
    }

    #[tokio::test]
    async fn test_scheduler_new_valid_concurrency() {
        let dir = TempDir::new().unwrap();
        for value in [1, 5, 100] {
            let config = SchedulerConfig {
                concurrency: value,
                ..SchedulerConfig::default()
            };
            let scheduler =
                Scheduler::new(config, store(&dir).await, HttpClient::new().unwrap()).unwrap();
            assert_eq!(scheduler.concurrency(), value);
        }
    }

    #[tokio::test]
    async fn test_scheduler_new_invalid_concurrency() {
        let dir = TempDir::new().unwrap();
        for value in [0, 101] {
            let config = SchedulerConfig {
                concurrency: value,
                ..SchedulerConfig::default()
            };
            let result = Scheduler::new(config, store(&dir).await, HttpClient::new().unwrap());
            assert!(matches!(
                result,
                Err(SchedulerError::InvalidConcurrency { value: v }) if v == value
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_run_emits_only_summary() {
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            store(&dir).await,
            HttpClient::new().unwrap(),
        )
        .unwrap();

        let mut run = scheduler.run(Vec::new());
        let first = run.next_event().await.unwrap();
        assert!(matches!(first, SchedulerEvent::Summary(ref s) if s.total() == 0));
        assert!(run.next_event().await.is_none());
        let summary = run.wait().await.unwrap();
        assert!(!summary.has_failures());
    }

    #[tokio::test]
    async fn test_cancel_before_admission_counts_not_started() {
        let dir = TempDir::new().unwrap();
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            store(&dir).await,
            HttpClient::new().unwrap(),
        )
        .unwrap();
        let requests = vec![
            TransferRequest::new("http://127.0.0.1:9/a.bin", dir.path().join("a.bin")).unwrap(),
            TransferRequest::new("http://127.0.0.1:9/b.bin", dir.path().join("b.bin")).unwrap(),
        ];

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            concurrency: 1,
            transfer_config: TransferConfig::default(),
            store: store(&dir).await,
            client: scheduler.client.clone(),
            cancel,
            events: events_tx,
            updates_tx,
            updates_rx,
            pending: requests.into_iter().enumerate().collect(),
            book: ProgressBook::default(),
            tasks: JoinSet::new(),
            task_ids: HashMap::new(),
            admitted: HashMap::new(),
            active: 0,
            summary: RunSummary::default(),
        };

        let summary = driver.run().await;
        assert_eq!(summary.not_started, 2);
        assert!(summary.was_interrupted());
        assert!(!summary.has_failures());
    }

    #[test]
    fn test_run_summary_records_failures() {
        let mut summary = RunSummary::default();
        summary.record(&TransferReport {
            transfer_id: 0,
            url: "https://example.com/a".to_string(),
            destination: PathBuf::from("/tmp/a"),
            outcome: TransferOutcome::Failed {
                kind: "server",
                cause: "HTTP 404".to_string(),
            },
            bytes_completed: 0,
            total_size: None,
            attempts: 1,
        });
        assert!(summary.has_failures());
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].kind, "server");
    }
}
