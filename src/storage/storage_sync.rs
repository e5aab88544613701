use crate::byte_range::ByteRange;

use super::{Bytes, MaybeBytes, StorageError, StoreKey};

/// Readable storage traits.
pub trait ReadableStorageTraits: Send + Sync {
    /// Retrieve the value (bytes) associated with a given [`StoreKey`].
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        Ok(self
            .get_partial_values_key(key, &[ByteRange::ALL])?
            .and_then(|mut values| values.pop()))
    }

    /// Retrieve partial bytes from a list of byte ranges for a store key.
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError>;

    /// Return the size in bytes of the value at `key`.
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    /// Returns a [`StorageError`] if there is an underlying storage error.
    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError>;

    /// Drop any cached directory listings.
    ///
    /// Stores which list directories to resolve keys should bound the memory held by those listings.
    /// The default implementation does nothing.
    fn clear_directory_cache(&self) {}
}

impl<T: ?Sized + ReadableStorageTraits> ReadableStorageTraits for std::sync::Arc<T> {
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        (**self).get(key)
    }

    fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        (**self).get_partial_values_key(key, byte_ranges)
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        (**self).size_key(key)
    }

    fn clear_directory_cache(&self) {
        (**self).clear_directory_cache();
    }
}
