//! A read-only store for tape archives.
//!
//! Values on tape cannot be read directly.
//! They are first recalled into a staging directory, after which they are read like any other file.
//! A read of a value which is not staged yet schedules a recall in the background and fails with [`StorageError::NotStaged`].

use std::{
    collections::HashSet,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;

use crate::{
    byte_range::ByteRange,
    storage::{Bytes, ReadableStorageTraits, StorageError, StoreKey},
};

use super::{FilesystemStore, FilesystemStoreCreateError, FilesystemStoreOptions};

/// A tape recall error.
#[derive(Debug, Error)]
pub enum RecallError {
    /// The archive does not hold the requested path.
    #[error("{0} does not exist in the archive")]
    NotFound(String),
    /// The recall failed.
    #[error("recall failed: {0}")]
    Failed(String),
    /// The recall did not complete in time.
    #[error("recall timed out after {0:?}")]
    TimedOut(Duration),
}

/// The default time allowed for a recall to complete.
pub const DEFAULT_RECALL_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

/// The number of paths remembered as missing from the archive.
const MISSING_CAPACITY: NonZeroUsize = match NonZeroUsize::new(4096) {
    Some(capacity) => capacity,
    None => panic!("zero capacity"),
};

/// Recalls values from a tape archive.
#[async_trait::async_trait]
pub trait TapeRecall: Send + Sync + std::fmt::Debug {
    /// Copy the archived file at `path` into the `destination` directory.
    ///
    /// # Errors
    /// Returns [`RecallError::NotFound`] if the archive does not hold `path`.
    async fn recall(&self, path: &str, destination: &Path) -> Result<(), RecallError>;
}

/// Recalls values by running an archive client such as `slk retrieve <path> <destination>`.
#[derive(Debug, Clone)]
pub struct CommandRecall {
    program: String,
    subcommand: String,
}

impl Default for CommandRecall {
    fn default() -> Self {
        Self::new("slk", "retrieve")
    }
}

impl CommandRecall {
    /// Create a new [`CommandRecall`] running `program subcommand <path> <destination>`.
    #[must_use]
    pub fn new(program: impl Into<String>, subcommand: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            subcommand: subcommand.into(),
        }
    }
}

#[async_trait::async_trait]
impl TapeRecall for CommandRecall {
    async fn recall(&self, path: &str, destination: &Path) -> Result<(), RecallError> {
        let output = tokio::process::Command::new(&self.program)
            .arg(&self.subcommand)
            .arg(path)
            .arg(destination)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| RecallError::Failed(format!("{}: {err}", self.program)))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
        if stderr.contains("not found") || stderr.contains("no such file") {
            Err(RecallError::NotFound(path.to_string()))
        } else {
            Err(RecallError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )))
        }
    }
}

/// A synchronous read-only store for a tape archive with a staging directory.
///
/// The key `a/b/c.nc` refers to the archived file `/a/b/c.nc`, which is staged at `<staging>/a/b/c.nc`.
/// Recalls need a tokio runtime; without one a read of an unstaged value fails without scheduling a recall.
/// A recall which does not complete within the recall timeout is abandoned, and the next read schedules it again.
/// Paths the archive does not hold are remembered, up to a bounded number of the most recently requested ones.
#[derive(Debug)]
pub struct ArchivalStore {
    staging: Arc<FilesystemStore>,
    recall: Arc<dyn TapeRecall>,
    recall_timeout: Duration,
    in_flight: Arc<Mutex<HashSet<StoreKey>>>,
    missing: Arc<Mutex<LruCache<StoreKey, ()>>>,
}

impl ArchivalStore {
    /// Create a new archival store staging recalled values in `staging_path`.
    ///
    /// The staging directory is created on the first recall if it does not exist.
    ///
    /// # Errors
    /// Returns a [`FilesystemStoreCreateError`] if `staging_path` is not a valid directory path.
    pub fn new<P: AsRef<Path>>(
        staging_path: P,
        recall: Arc<dyn TapeRecall>,
    ) -> Result<Self, FilesystemStoreCreateError> {
        let staging = FilesystemStore::new_with_options(
            staging_path,
            FilesystemStoreOptions {
                lazy: true,
                cache_size: 0,
            },
        )?;
        Ok(Self {
            staging: Arc::new(staging),
            recall,
            recall_timeout: DEFAULT_RECALL_TIMEOUT,
            in_flight: Arc::default(),
            missing: Arc::new(Mutex::new(LruCache::new(MISSING_CAPACITY))),
        })
    }

    /// Set the time allowed for a recall to complete. Defaults to [`DEFAULT_RECALL_TIMEOUT`].
    #[must_use]
    pub fn with_recall_timeout(mut self, recall_timeout: Duration) -> Self {
        self.recall_timeout = recall_timeout;
        self
    }

    /// Return the staging directory.
    #[must_use]
    pub fn staging_path(&self) -> &Path {
        self.staging.base_path()
    }

    /// Return the number of recalls which have not completed.
    #[must_use]
    pub fn pending_recalls(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn schedule_recall(&self, key: &StoreKey) {
        if !self.in_flight.lock().insert(key.clone()) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key = %key, "cannot recall from tape without an async runtime");
            self.in_flight.lock().remove(key);
            return;
        };

        let key = key.clone();
        let destination: PathBuf = self
            .staging
            .key_to_fspath(&key)
            .parent()
            .map_or_else(|| self.staging.base_path().to_path_buf(), Path::to_path_buf);
        let staging = self.staging.clone();
        let recall = self.recall.clone();
        let recall_timeout = self.recall_timeout;
        let in_flight = self.in_flight.clone();
        let missing = self.missing.clone();
        handle.spawn(async move {
            let path = format!("/{}", key.as_str());
            tracing::info!(path = %path, "recalling from tape");
            let result = match tokio::fs::create_dir_all(&destination).await {
                Ok(()) => tokio::time::timeout(recall_timeout, recall.recall(&path, &destination))
                    .await
                    .unwrap_or(Err(RecallError::TimedOut(recall_timeout))),
                Err(err) => Err(RecallError::Failed(err.to_string())),
            };
            match result {
                Ok(()) => tracing::info!(path = %path, "recalled from tape"),
                Err(RecallError::NotFound(_)) => {
                    tracing::warn!(path = %path, "not found on tape");
                    missing.lock().put(key.clone(), ());
                }
                Err(err) => tracing::warn!(path = %path, error = %err, "tape recall failed"),
            }
            staging.clear_directory_cache();
            in_flight.lock().remove(&key);
        });
    }
}

impl ReadableStorageTraits for ArchivalStore {
    fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        if self.missing.lock().contains(key) {
            return Ok(None);
        }
        if let Some(values) = self.staging.get_partial_values_key(key, byte_ranges)? {
            return Ok(Some(values));
        }
        self.schedule_recall(key);
        Err(StorageError::NotStaged(key.clone()))
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        if self.missing.lock().contains(key) {
            return Ok(None);
        }
        if let Some(size) = self.staging.size_key(key)? {
            return Ok(Some(size));
        }
        self.schedule_recall(key);
        Err(StorageError::NotStaged(key.clone()))
    }

    fn clear_directory_cache(&self) {
        self.staging.clear_directory_cache();
    }
}
