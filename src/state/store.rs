//! Storage seam for transfer state and its JSON-file implementation.
//!
//! Transfers depend only on [`StateStore`]; the scheduler hands them an
//! `Arc<dyn StateStore>` so tests can substitute their own backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::{FORMAT_VERSION, Result, StoreError, TransferKey, TransferState};

/// Durable key-value storage for [`TransferState`] records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the record for `key`, or `None` when absent or unreadable.
    async fn load(&self, key: &TransferKey) -> Result<Option<TransferState>>;

    /// Atomically replaces the record for `key`.
    async fn save(&self, key: &TransferKey, state: &TransferState) -> Result<()>;

    /// Removes the record for `key`. Deleting a missing record is not an error.
    async fn delete(&self, key: &TransferKey) -> Result<()>;
}

/// Directory of `<key>.json` files, one per transfer.
///
/// A save writes `<key>.json.tmp`, syncs it, and renames it over the record,
/// so a crash leaves either the old or the new record, never a torn one.
#[derive(Debug)]
pub struct JsonStateStore {
    dir: PathBuf,
    locks: DashMap<TransferKey, Arc<Mutex<()>>>,
}

impl JsonStateStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;
        debug!(dir = %dir.display(), "opened state store");
        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    /// Returns the directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the record path for `key`.
    #[must_use]
    pub fn record_path(&self, key: &TransferKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn lock_for(&self, key: &TransferKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    #[cfg(unix)]
    async fn sync_dir(&self) -> Result<()> {
        let dir = tokio::fs::File::open(&self.dir)
            .await
            .map_err(|e| StoreError::io(&self.dir, e))?;
        dir.sync_all()
            .await
            .map_err(|e| StoreError::io(&self.dir, e))
    }

    #[cfg(not(unix))]
    #[allow(clippy::unused_async)]
    async fn sync_dir(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn load(&self, key: &TransferKey) -> Result<Option<TransferState>> {
        let path = self.record_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let state: TransferState = match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt transfer state record, ignoring");
                return Ok(None);
            }
        };

        if state.format_version > FORMAT_VERSION {
            warn!(
                path = %path.display(),
                version = state.format_version,
                supported = FORMAT_VERSION,
                "transfer state record from a newer format, ignoring"
            );
            return Ok(None);
        }

        debug!(
            status = %state.status,
            bytes_completed = state.bytes_completed,
            "loaded transfer state"
        );
        Ok(Some(state))
    }

    #[instrument(skip(self, state), fields(key = %key, status = %state.status))]
    async fn save(&self, key: &TransferKey, state: &TransferState) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let path = self.record_path(key);
        let tmp_path = self.dir.join(format!("{key}.json.tmp"));
        let json = serde_json::to_vec_pretty(state).map_err(|e| StoreError::encode(&path, e))?;

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::io(&tmp_path, e))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        self.sync_dir().await?;

        debug!(bytes_completed = state.bytes_completed, "saved transfer state");
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, key: &TransferKey) -> Result<()> {
        let lock = self.lock_for(key);
        let _guard = lock.lock().await;

        let path = self.record_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("deleted transfer state");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}
