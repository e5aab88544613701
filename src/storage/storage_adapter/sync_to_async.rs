//! A synchronous to asynchronous storage adapter.

use crate::{
    byte_range::ByteRange,
    storage::{
        AsyncReadableStorageTraits, Bytes, MaybeBytes, ReadableStorageTraits, StorageError,
        StoreKey,
    },
};

use std::sync::Arc;

/// A synchronous to asynchronous storage adapter.
///
/// Each read runs on the blocking thread pool of the current tokio runtime, so a slow filesystem never stalls the async workers.
pub struct SyncToAsyncStorageAdapter<TStorage: ?Sized> {
    storage: Arc<TStorage>,
}

impl<TStorage: ?Sized> SyncToAsyncStorageAdapter<TStorage> {
    /// Create a new synchronous to asynchronous storage adapter.
    #[must_use]
    pub fn new(storage: Arc<TStorage>) -> Self {
        Self { storage }
    }

    /// Return the wrapped storage.
    #[must_use]
    pub fn storage(&self) -> &Arc<TStorage> {
        &self.storage
    }
}

impl<TStorage: ?Sized> std::fmt::Debug for SyncToAsyncStorageAdapter<TStorage> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncToAsyncStorageAdapter").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl<TStorage: ?Sized + ReadableStorageTraits + 'static> AsyncReadableStorageTraits
    for SyncToAsyncStorageAdapter<TStorage>
{
    async fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        let storage = self.storage.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || storage.get(&key)).await?
    }

    async fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        let storage = self.storage.clone();
        let key = key.clone();
        let byte_ranges = byte_ranges.to_vec();
        tokio::task::spawn_blocking(move || storage.get_partial_values_key(&key, &byte_ranges))
            .await?
    }

    async fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        let storage = self.storage.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || storage.size_key(&key)).await?
    }

    fn clear_directory_cache(&self) {
        self.storage.clear_directory_cache();
    }
}
