//! File-backed [`ChunkSink`] that checkpoints transfer state.
//!
//! Bytes go through a `BufWriter` into `<dest>.part`. A checkpoint always
//! flushes and syncs the file before the state record is saved, so a persisted
//! `bytes_completed` never points past bytes that are on disk.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::debug;

use super::Reporter;
use crate::download::constants::WRITE_BUFFER_SIZE;
use crate::download::{ChunkProgress, ChunkSink, ResponseMeta, TransferError};
use crate::state::{StateStore, TransferKey, TransferState, TransferStatus};

/// Writes into the partial file and keeps the in-memory state in step.
pub(crate) struct FileSink<'a> {
    path: PathBuf,
    url: &'a str,
    writer: BufWriter<File>,
    state: &'a mut TransferState,
    store: &'a dyn StateStore,
    key: &'a TransferKey,
    reporter: &'a Reporter,
    checkpoint_interval: Duration,
    last_checkpoint: Instant,
}

impl<'a> FileSink<'a> {
    /// Opens `path` for writing at `state.bytes_completed`, dropping any bytes past it.
    pub(crate) async fn open(
        path: &Path,
        url: &'a str,
        state: &'a mut TransferState,
        store: &'a dyn StateStore,
        key: &'a TransferKey,
        reporter: &'a Reporter,
        checkpoint_interval: Duration,
    ) -> Result<Self, TransferError> {
        let offset = state.bytes_completed;
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await
            .map_err(|e| TransferError::storage(path, e))?;
        file.set_len(offset)
            .await
            .map_err(|e| TransferError::storage(path, e))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| TransferError::storage(path, e))?;
        debug!(path = %path.display(), offset, "opened partial file");

        Ok(Self {
            path: path.to_path_buf(),
            url,
            writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
            state,
            store,
            key,
            reporter,
            checkpoint_interval,
            last_checkpoint: Instant::now(),
        })
    }

    /// Current in-memory state.
    pub(crate) fn state(&self) -> &TransferState {
        &*self.state
    }

    /// Flushes and syncs file bytes, then persists the state with `status`.
    pub(crate) async fn checkpoint(&mut self, status: TransferStatus) -> Result<(), TransferError> {
        self.sync().await?;
        self.state.status = status;
        self.state.touch();
        self.store.save(self.key, &*self.state).await?;
        self.last_checkpoint = Instant::now();
        debug!(
            bytes_completed = self.state.bytes_completed,
            %status,
            "checkpointed transfer"
        );
        Ok(())
    }

    /// Flushes and fully syncs the file, consuming the sink.
    pub(crate) async fn finish(mut self) -> Result<(), TransferError> {
        self.writer
            .flush()
            .await
            .map_err(|e| TransferError::storage(&self.path, e))?;
        self.writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| TransferError::storage(&self.path, e))
    }

    async fn sync(&mut self) -> Result<(), TransferError> {
        self.writer
            .flush()
            .await
            .map_err(|e| TransferError::storage(&self.path, e))?;
        self.writer
            .get_ref()
            .sync_data()
            .await
            .map_err(|e| TransferError::storage(&self.path, e))
    }
}

#[async_trait]
impl<'a> ChunkSink for FileSink<'a> {
    async fn begin(&mut self, meta: &ResponseMeta) -> Result<(), TransferError> {
        if meta.start_offset > 0 {
            if let (Some(expected), Some(actual)) = (&self.state.validator, &meta.validator)
                && expected != actual
            {
                return Err(TransferError::validator_mismatch(
                    self.url,
                    expected.clone(),
                    actual.clone(),
                ));
            }
            if let (Some(expected), Some(actual)) = (self.state.total_size, meta.total_size)
                && expected != actual
            {
                return Err(TransferError::validator_mismatch(
                    self.url,
                    format!("{expected} bytes"),
                    format!("{actual} bytes"),
                ));
            }
        }

        self.state.total_size = meta.total_size;
        if meta.validator.is_some() || meta.start_offset == 0 {
            self.state.validator.clone_from(&meta.validator);
        }
        self.checkpoint(TransferStatus::InProgress).await?;
        self.reporter
            .progress(self.state.bytes_completed, self.state.total_size);
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        self.writer
            .write_all(chunk)
            .await
            .map_err(|e| TransferError::storage(&self.path, e))
    }

    async fn record_progress(&mut self, progress: ChunkProgress) -> Result<(), TransferError> {
        self.state.bytes_completed = progress.bytes_completed;
        self.state.total_size = progress.total_size;
        self.reporter
            .progress(progress.bytes_completed, progress.total_size);

        if self.last_checkpoint.elapsed() >= self.checkpoint_interval {
            self.checkpoint(TransferStatus::InProgress).await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), TransferError> {
        self.sync().await
    }
}
