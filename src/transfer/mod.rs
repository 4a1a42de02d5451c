//! One URL's journey from request to file on disk.
//!
//! A [`Transfer`] consults the state store, decides whether earlier bytes can
//! be kept, then drives the [`RangeFetcher`] until the file is complete, the
//! failure is permanent, retries run out, or the run is cancelled.
//!
//! ```text
//! Pending -> (validate partial) -> Fetching -> Completed | Failed | Paused
//!                                     ^   |
//!                                     +---+ retry from checkpoint / reset to zero
//! ```

mod request;
mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub use request::{TransferId, TransferRequest};
use sink::FileSink;

use crate::download::constants::DEFAULT_CHECKPOINT_INTERVAL;
use crate::download::{
    FailureType, FetchOutcome, FetchRequest, HttpClient, RangeFetcher, RemoteMeta, RetryDecision,
    RetryPolicy, TransferError, classify_error, retry_after_delay,
};
use crate::filename::partial_path;
use crate::state::{StateStore, TransferKey, TransferState, TransferStatus};

/// Per-transfer behavior knobs.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Backoff and attempt limit for transient failures.
    pub retry_policy: RetryPolicy,
    /// Minimum time between durable checkpoints.
    pub checkpoint_interval: Duration,
    /// Replace an existing destination whose size differs from the remote.
    pub allow_overwrite: bool,
    /// Continue from persisted partial files.
    pub allow_resume: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            allow_overwrite: true,
            allow_resume: true,
        }
    }
}

/// A progress tick from one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Which transfer.
    pub transfer_id: TransferId,
    /// Bytes held in the partial (or final) file.
    pub bytes_completed: u64,
    /// Total size when known.
    pub total_size: Option<u64>,
    /// When the tick was produced.
    pub timestamp: SystemTime,
}

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Destination file is complete.
    Completed,
    /// Gave up.
    Failed {
        /// Short error class, see [`TransferError::kind`].
        kind: &'static str,
        /// Human-readable cause.
        cause: String,
    },
    /// Cancelled; resumable by a later run.
    Paused,
}

/// Final report of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Which transfer.
    pub transfer_id: TransferId,
    /// Source URL.
    pub url: String,
    /// Destination path.
    pub destination: PathBuf,
    /// How it ended.
    pub outcome: TransferOutcome,
    /// Bytes held when it ended.
    pub bytes_completed: u64,
    /// Total size when known.
    pub total_size: Option<u64>,
    /// Fetch attempts made in this run.
    pub attempts: u32,
}

/// Messages a running transfer sends to whoever drives it.
#[derive(Debug, Clone)]
pub enum TransferUpdate {
    /// Bytes advanced (or the total became known).
    Progress(ProgressEvent),
    /// Previously held bytes were discarded.
    Reset {
        /// Which transfer.
        transfer_id: TransferId,
        /// How many bytes were dropped.
        bytes_discarded: u64,
        /// Why.
        reason: String,
    },
    /// The transfer ended. Always its last message.
    Finished(TransferReport),
}

/// Tags updates with the transfer id and sends them, ignoring a closed receiver.
#[derive(Debug, Clone)]
pub(crate) struct Reporter {
    transfer_id: TransferId,
    tx: mpsc::UnboundedSender<TransferUpdate>,
}

impl Reporter {
    pub(crate) fn new(transfer_id: TransferId, tx: mpsc::UnboundedSender<TransferUpdate>) -> Self {
        Self { transfer_id, tx }
    }

    pub(crate) fn progress(&self, bytes_completed: u64, total_size: Option<u64>) {
        let _ = self.tx.send(TransferUpdate::Progress(ProgressEvent {
            transfer_id: self.transfer_id,
            bytes_completed,
            total_size,
            timestamp: SystemTime::now(),
        }));
    }

    pub(crate) fn reset(&self, bytes_discarded: u64, reason: &str) {
        let _ = self.tx.send(TransferUpdate::Reset {
            transfer_id: self.transfer_id,
            bytes_discarded,
            reason: reason.to_string(),
        });
    }

    pub(crate) fn finished(&self, report: TransferReport) {
        let _ = self.tx.send(TransferUpdate::Finished(report));
    }
}

enum Finish {
    Completed,
    Paused,
}

/// A single resumable download.
pub struct Transfer {
    id: TransferId,
    request: TransferRequest,
    key: TransferKey,
    config: TransferConfig,
    store: Arc<dyn StateStore>,
    client: HttpClient,
    fetcher: RangeFetcher,
    cancel: CancellationToken,
    reporter: Reporter,
}

impl Transfer {
    /// Creates a transfer. Nothing happens until [`Transfer::run`].
    #[must_use]
    pub fn new(
        id: TransferId,
        request: TransferRequest,
        config: TransferConfig,
        store: Arc<dyn StateStore>,
        client: HttpClient,
        cancel: CancellationToken,
        updates: mpsc::UnboundedSender<TransferUpdate>,
    ) -> Self {
        let key = request.key();
        Self {
            id,
            request,
            key,
            config,
            store,
            fetcher: RangeFetcher::new(client.clone()),
            client,
            cancel,
            reporter: Reporter::new(id, updates),
        }
    }

    /// Runs to a terminal or paused state and reports the result.
    ///
    /// Also sends the report as the final [`TransferUpdate::Finished`].
    pub async fn run(self) -> TransferReport {
        let mut state = TransferState::new(self.request.url().as_str(), self.request.destination());
        let mut attempts = 0;

        let outcome = match self.drive(&mut state, &mut attempts).await {
            Ok(Finish::Completed) => TransferOutcome::Completed,
            Ok(Finish::Paused) => TransferOutcome::Paused,
            Err(error) => {
                warn!(
                    transfer_id = self.id,
                    url = %self.request.url(),
                    attempts,
                    error = %error,
                    "transfer failed"
                );
                self.persist_failed(&mut state).await;
                TransferOutcome::Failed {
                    kind: error.kind(),
                    cause: error.to_string(),
                }
            }
        };

        let report = TransferReport {
            transfer_id: self.id,
            url: self.request.url().to_string(),
            destination: self.request.destination().to_path_buf(),
            outcome,
            bytes_completed: state.bytes_completed,
            total_size: state.total_size,
            attempts,
        };
        self.reporter.finished(report.clone());
        report
    }

    #[instrument(skip_all, fields(transfer_id = self.id, url = %self.request.url()))]
    async fn drive(
        &self,
        state: &mut TransferState,
        attempts: &mut u32,
    ) -> Result<Finish, TransferError> {
        let destination = self.request.destination();
        let partial = partial_path(destination);

        let prior = self.store.load(&self.key).await?;

        if let Some(prior) = &prior
            && prior.status == TransferStatus::Completed
        {
            if path_exists(destination).await? {
                *state = prior.clone();
                info!("already completed by an earlier run");
                self.reporter
                    .progress(state.bytes_completed, state.total_size);
                self.prune().await;
                return Ok(Finish::Completed);
            }
            if file_len(&partial).await? == Some(prior.bytes_completed) {
                *state = prior.clone();
                debug!("finishing rename interrupted by an earlier run");
                return self.complete(&partial, state).await;
            }
        }

        let resumable = prior
            .filter(|p| p.status.is_resumable() && p.bytes_completed > 0);

        if resumable.is_none()
            && path_exists(destination).await?
            && let Some(finish) = self.check_destination(state).await?
        {
            return Ok(finish);
        }

        state.status = TransferStatus::InProgress;
        match resumable {
            Some(prior) if self.config.allow_resume => {
                *state = prior;
                if let Some(finish) = self.validate_partial(&partial, state).await? {
                    return Ok(finish);
                }
            }
            Some(prior) => {
                info!(
                    discarded = prior.bytes_completed,
                    "resume disabled, starting from zero"
                );
            }
            None => {}
        }

        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::storage(parent, e))?;
        }

        self.fetch_loop(&partial, state, attempts).await
    }

    async fn fetch_loop(
        &self,
        partial: &Path,
        state: &mut TransferState,
        attempts: &mut u32,
    ) -> Result<Finish, TransferError> {
        let url = self.request.url();
        let mut attempt = 0u32;
        let mut restarted = false;

        loop {
            attempt += 1;
            *attempts += 1;

            let request = FetchRequest {
                url: url.clone(),
                headers: self.request.headers().clone(),
                start_offset: state.bytes_completed,
                validator: if state.bytes_completed > 0 {
                    state.validator.clone()
                } else {
                    None
                },
            };
            debug!(attempt, offset = request.start_offset, "starting fetch");

            let mut sink = FileSink::open(
                partial,
                url.as_str(),
                state,
                self.store.as_ref(),
                &self.key,
                &self.reporter,
                self.config.checkpoint_interval,
            )
            .await?;

            let outcome = self.fetcher.fetch(&request, &mut sink, &self.cancel).await;
            let error = match outcome {
                FetchOutcome::Completed {
                    bytes_completed,
                    total_size,
                } => {
                    sink.finish().await?;
                    state.bytes_completed = bytes_completed;
                    state.total_size = total_size;
                    return self.complete(partial, state).await;
                }
                FetchOutcome::Cancelled { bytes_completed } => {
                    sink.checkpoint(TransferStatus::Paused).await?;
                    info!(bytes_completed, "transfer paused");
                    return Ok(Finish::Paused);
                }
                FetchOutcome::ResumeRejected { status } => {
                    drop(sink);
                    TransferError::resume_rejected(url.as_str(), status)
                }
                FetchOutcome::Failed(error) => {
                    sink.checkpoint(TransferStatus::InProgress).await?;
                    debug!(
                        bytes_completed = sink.state().bytes_completed,
                        "checkpointed after failed attempt"
                    );
                    drop(sink);
                    error
                }
            };

            match classify_error(&error) {
                FailureType::Permanent => return Err(error),
                FailureType::RestartFromZero => {
                    if restarted {
                        return Err(error);
                    }
                    restarted = true;
                    warn!(error = %error, "partial content unusable, restarting from zero");
                    self.reset(state, &error.to_string()).await?;
                }
                FailureType::Transient => {
                    match self
                        .config
                        .retry_policy
                        .should_retry(FailureType::Transient, attempt)
                    {
                        RetryDecision::Retry {
                            delay: backoff_delay,
                            attempt: next_attempt,
                        } => {
                            let server_delay = retry_after_delay(&error);
                            let delay = server_delay.unwrap_or(backoff_delay);
                            warn!(
                                attempt = next_attempt,
                                max_attempts = self.config.retry_policy.max_attempts(),
                                delay_ms = delay.as_millis(),
                                using_retry_after = server_delay.is_some(),
                                offset = state.bytes_completed,
                                error = %error,
                                "retrying transfer"
                            );
                            tokio::select! {
                                biased;
                                () = self.cancel.cancelled() => {
                                    return self.pause(state, "backoff").await;
                                }
                                () = tokio::time::sleep(delay) => {}
                            }
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(%reason, "not retrying transfer");
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    /// Checks an existing destination against the remote size.
    ///
    /// Returns `Some` when the transfer ends here: the file already matches, or
    /// the run was cancelled while asking. `None` means fetch and overwrite.
    async fn check_destination(
        &self,
        state: &mut TransferState,
    ) -> Result<Option<Finish>, TransferError> {
        let destination = self.request.destination();
        let local_len = tokio::fs::metadata(destination)
            .await
            .map_err(|e| TransferError::storage(destination, e))?
            .len();

        let Some(probed) = self.probe_unless_cancelled().await else {
            info!("cancelled while checking existing destination");
            return Ok(Some(Finish::Paused));
        };
        match probed {
            Ok(meta) if meta.total_size == Some(local_len) => {
                info!(bytes = local_len, "destination already matches remote size, skipping");
                state.bytes_completed = local_len;
                state.total_size = Some(local_len);
                state.validator = meta.validator;
                state.status = TransferStatus::Completed;
                self.reporter.progress(local_len, Some(local_len));
                Ok(Some(Finish::Completed))
            }
            Ok(meta) if self.config.allow_overwrite => {
                info!(
                    local = local_len,
                    remote = ?meta.total_size,
                    "destination differs from remote, overwriting"
                );
                Ok(None)
            }
            Err(error) if self.config.allow_overwrite => {
                debug!(error = %error, "could not probe remote size, overwriting");
                Ok(None)
            }
            _ => Err(TransferError::DestinationExists {
                path: destination.to_path_buf(),
            }),
        }
    }

    /// Keeps `state` when the partial file and remote still match it, else resets it.
    ///
    /// Returns `Some(Finish::Paused)` if the run was cancelled during the check.
    async fn validate_partial(
        &self,
        partial: &Path,
        state: &mut TransferState,
    ) -> Result<Option<Finish>, TransferError> {
        let on_disk = file_len(partial).await?.unwrap_or(0);
        if on_disk < state.bytes_completed {
            warn!(
                on_disk,
                checkpoint = state.bytes_completed,
                "partial file shorter than checkpoint, restarting"
            );
            self.reset(state, "partial file shorter than recorded progress")
                .await?;
            return Ok(None);
        }

        let Some(probed) = self.probe_unless_cancelled().await else {
            return self.pause(state, "resume check").await.map(Some);
        };
        match probed {
            Ok(meta) => {
                let validator_changed = matches!(
                    (&state.validator, &meta.validator),
                    (Some(recorded), Some(current)) if recorded != current
                );
                let size_changed = matches!(
                    (state.total_size, meta.total_size),
                    (Some(recorded), Some(current)) if recorded != current
                );
                if validator_changed || size_changed {
                    let error = TransferError::validator_mismatch(
                        self.request.url().as_str(),
                        describe_remote(state.validator.as_deref(), state.total_size),
                        describe_remote(meta.validator.as_deref(), meta.total_size),
                    );
                    warn!(error = %error, "remote resource changed, restarting");
                    self.reset(state, &error.to_string()).await?;
                    return Ok(None);
                }
            }
            Err(error) => {
                warn!(error = %error, "probe failed, relying on If-Range to guard resume");
            }
        }

        info!(
            offset = state.bytes_completed,
            total = ?state.total_size,
            "resuming transfer"
        );
        state.status = TransferStatus::InProgress;
        self.reporter
            .progress(state.bytes_completed, state.total_size);
        Ok(None)
    }

    /// HEAD probe that gives up as soon as the run is cancelled.
    async fn probe_unless_cancelled(&self) -> Option<Result<RemoteMeta, TransferError>> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            probed = self.client.probe(self.request.url(), self.request.headers()) => Some(probed),
        }
    }

    /// Saves `state` as Paused so a later run picks up at the same offset.
    async fn pause(&self, state: &mut TransferState, during: &str) -> Result<Finish, TransferError> {
        state.status = TransferStatus::Paused;
        state.touch();
        self.store.save(&self.key, state).await?;
        info!(bytes_completed = state.bytes_completed, during, "transfer paused");
        Ok(Finish::Paused)
    }

    async fn reset(&self, state: &mut TransferState, reason: &str) -> Result<(), TransferError> {
        let discarded = state.bytes_completed;
        state.reset();
        self.store.save(&self.key, state).await?;
        self.reporter.reset(discarded, reason);
        Ok(())
    }

    async fn complete(
        &self,
        partial: &Path,
        state: &mut TransferState,
    ) -> Result<Finish, TransferError> {
        let destination = self.request.destination();

        state.status = TransferStatus::Completed;
        state.touch();
        self.store.save(&self.key, state).await?;

        tokio::fs::rename(partial, destination)
            .await
            .map_err(|e| TransferError::storage(destination, e))?;
        self.prune().await;

        self.reporter
            .progress(state.bytes_completed, state.total_size);
        info!(
            bytes = state.bytes_completed,
            destination = %destination.display(),
            "transfer completed"
        );
        Ok(Finish::Completed)
    }

    async fn prune(&self) {
        if let Err(error) = self.store.delete(&self.key).await {
            warn!(error = %error, "could not prune completed transfer record");
        }
    }

    async fn persist_failed(&self, state: &mut TransferState) {
        if state.status == TransferStatus::Pending {
            return;
        }
        state.status = TransferStatus::Failed;
        state.touch();
        if let Err(error) = self.store.save(&self.key, state).await {
            warn!(error = %error, "could not record failed transfer");
        }
    }
}

fn describe_remote(validator: Option<&str>, total_size: Option<u64>) -> String {
    match (validator, total_size) {
        (Some(validator), Some(size)) => format!("{validator} ({size} bytes)"),
        (Some(validator), None) => validator.to_string(),
        (None, Some(size)) => format!("{size} bytes"),
        (None, None) => "unknown".to_string(),
    }
}

async fn path_exists(path: &Path) -> Result<bool, TransferError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| TransferError::storage(path, e))
}

async fn file_len(path: &Path) -> Result<Option<u64>, TransferError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(TransferError::storage(path, e)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::state::{JsonStateStore, StoreError};
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    fn fast_config() -> TransferConfig {
        TransferConfig {
            retry_policy: RetryPolicy::new(
                3,
                Duration::from_millis(10),
                Duration::from_millis(20),
                2.0,
            ),
            checkpoint_interval: Duration::ZERO,
            ..TransferConfig::default()
        }
    }

    async fn run_transfer(
        server: &MockServer,
        route: &str,
        dir: &TempDir,
        store: Arc<dyn StateStore>,
        config: TransferConfig,
    ) -> (TransferReport, Vec<TransferUpdate>) {
        let request = TransferRequest::new(
            &format!("{}{route}", server.uri()),
            dir.path().join("out.bin"),
        )
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transfer = Transfer::new(
            0,
            request,
            config,
            store,
            HttpClient::new().unwrap(),
            CancellationToken::new(),
            tx,
        );
        let report = transfer.run().await;
        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        (report, updates)
    }

    struct FailingStore;

    #[async_trait]
    impl StateStore for FailingStore {
        async fn load(&self, _key: &TransferKey) -> crate::state::Result<Option<TransferState>> {
            Err(StoreError::io(
                "/state/broken.json",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            ))
        }

        async fn save(&self, _key: &TransferKey, _state: &TransferState) -> crate::state::Result<()> {
            Ok(())
        }

        async fn delete(&self, _key: &TransferKey) -> crate::state::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_transfer_config_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.checkpoint_interval, Duration::from_millis(500));
        assert!(config.allow_overwrite);
        assert!(config.allow_resume);
        assert_eq!(config.retry_policy.max_attempts(), 3);
    }

    #[tokio::test]
    async fn test_fresh_transfer_completes_renames_and_prunes() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world".to_vec()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonStateStore::open(dir.path().join("state")).await.unwrap());
        let (report, updates) =
            run_transfer(&server, "/file.bin", &dir, store.clone(), fast_config()).await;

        assert_eq!(report.outcome, TransferOutcome::Completed);
        assert_eq!(report.bytes_completed, 11);
        assert_eq!(report.attempts, 1);
        assert_eq!(
            std::fs::read(dir.path().join("out.bin")).unwrap(),
            b"hello world"
        );
        assert!(!dir.path().join("out.bin.part").exists());

        let key = TransferKey::new(&report.url, &report.destination);
        assert!(store.load(&key).await.unwrap().is_none(), "record not pruned");
        assert!(matches!(updates.last(), Some(TransferUpdate::Finished(_))));
    }

    #[tokio::test]
    async fn test_existing_destination_with_remote_size_is_skipped() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .and(path("/same.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", "10")
                    .set_body_bytes(b"0123456789".to_vec()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/same.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("out.bin"), b"abcdefghij").unwrap();
        let store = Arc::new(JsonStateStore::open(dir.path().join("state")).await.unwrap());
        let (report, _) = run_transfer(&server, "/same.bin", &dir, store, fast_config()).await;

        assert_eq!(report.outcome, TransferOutcome::Completed);
        assert_eq!(report.attempts, 0);
        assert_eq!(
            std::fs::read(dir.path().join("out.bin")).unwrap(),
            b"abcdefghij"
        );
    }

    #[tokio::test]
    async fn test_existing_destination_differs_without_overwrite_fails() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .and(path("/other.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", "10")
                    .set_body_bytes(b"0123456789".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("out.bin"), b"abc").unwrap();
        let store = Arc::new(JsonStateStore::open(dir.path().join("state")).await.unwrap());
        let config = TransferConfig {
            allow_overwrite: false,
            ..fast_config()
        };
        let (report, _) = run_transfer(&server, "/other.bin", &dir, store, config).await;

        match report.outcome {
            TransferOutcome::Failed { kind, cause } => {
                assert_eq!(kind, "config");
                assert!(cause.contains("already exists"), "cause: {cause}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_existing_destination_differs_is_overwritten_by_default() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .and(path("/new.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", "10")
                    .set_body_bytes(b"0123456789".to_vec()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", "10")
                    .set_body_bytes(b"0123456789".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("out.bin"), b"abc").unwrap();
        let store = Arc::new(JsonStateStore::open(dir.path().join("state")).await.unwrap());
        let (report, _) = run_transfer(&server, "/new.bin", &dir, store, fast_config()).await;

        assert_eq!(report.outcome, TransferOutcome::Completed);
        assert_eq!(
            std::fs::read(dir.path().join("out.bin")).unwrap(),
            b"0123456789"
        );
    }

    #[tokio::test]
    async fn test_store_load_error_is_fatal() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/file.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"data".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (report, _) =
            run_transfer(&server, "/file.bin", &dir, Arc::new(FailingStore), fast_config()).await;

        assert!(matches!(
            report.outcome,
            TransferOutcome::Failed {
                kind: "storage",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/gone.bin"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonStateStore::open(dir.path().join("state")).await.unwrap());
        let (report, _) = run_transfer(&server, "/gone.bin", &dir, store, fast_config()).await;

        assert_eq!(report.attempts, 1);
        assert!(matches!(
            report.outcome,
            TransferOutcome::Failed { kind: "server", .. }
        ));
    }

    #[tokio::test]
    async fn test_cancel_while_checking_destination_pauses() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("HEAD"))
            .and(path("/slow-head.bin"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("out.bin"), b"abc").unwrap();
        let store = Arc::new(JsonStateStore::open(dir.path().join("state")).await.unwrap());
        let request = TransferRequest::new(
            &format!("{}/slow-head.bin", server.uri()),
            dir.path().join("out.bin"),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let transfer = Transfer::new(
            0,
            request,
            fast_config(),
            store,
            HttpClient::new().unwrap(),
            cancel.clone(),
            tx,
        );
        let handle = tokio::spawn(transfer.run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let report = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.outcome, TransferOutcome::Paused);
        assert_eq!(std::fs::read(dir.path().join("out.bin")).unwrap(), b"abc");
    }

    #[test]
    fn test_describe_remote() {
        assert_eq!(describe_remote(Some("\"a\""), Some(3)), "\"a\" (3 bytes)");
        assert_eq!(describe_remote(None, Some(3)), "3 bytes");
        assert_eq!(describe_remote(None, None), "unknown");
    }
}
