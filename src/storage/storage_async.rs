use futures::{stream::BoxStream, StreamExt};

use crate::byte_range::ByteRange;

use super::{Bytes, MaybeBytes, StorageError, StoreKey};

/// A stream of bytes retrieved incrementally from a store.
///
/// Dropping the stream abandons the underlying read.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Wrap fully retrieved `bytes` as a [`ByteStream`] with a single part.
#[must_use]
pub fn single_part_stream(bytes: Bytes) -> ByteStream {
    futures::stream::once(async move { Ok(bytes) }).boxed()
}

/// Async readable storage traits.
#[async_trait::async_trait]
pub trait AsyncReadableStorageTraits: Send + Sync {
    /// Retrieve the value (bytes) associated with a given [`StoreKey`].
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an error with the underlying store.
    async fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        Ok(self
            .get_partial_values_key(key, &[ByteRange::ALL])
            .await?
            .and_then(|mut values| values.pop()))
    }

    /// Retrieve partial bytes from a list of byte ranges for a store key.
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an underlying storage error.
    async fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError>;

    /// Retrieve a byte range of the value at `key` as a [`ByteStream`].
    ///
    /// Returns [`None`] if the key is not found.
    /// The default implementation retrieves the byte range in full and yields it as a single part.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an underlying storage error.
    async fn get_stream(
        &self,
        key: &StoreKey,
        byte_range: ByteRange,
    ) -> Result<Option<ByteStream>, StorageError> {
        Ok(self
            .get_partial_values_key(key, &[byte_range])
            .await?
            .and_then(|mut values| values.pop())
            .map(single_part_stream))
    }

    /// Return the size in bytes of the value at `key`.
    ///
    /// Returns [`None`] if the key is not found.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if there is an underlying storage error.
    async fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError>;

    /// Drop any cached directory listings.
    ///
    /// The default implementation does nothing.
    fn clear_directory_cache(&self) {}
}

#[async_trait::async_trait]
impl<T: ?Sized + AsyncReadableStorageTraits> AsyncReadableStorageTraits for std::sync::Arc<T> {
    async fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        (**self).get(key).await
    }

    async fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        (**self).get_partial_values_key(key, byte_ranges).await
    }

    async fn get_stream(
        &self,
        key: &StoreKey,
        byte_range: ByteRange,
    ) -> Result<Option<ByteStream>, StorageError> {
        (**self).get_stream(key, byte_range).await
    }

    async fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        (**self).size_key(key).await
    }

    fn clear_directory_cache(&self) {
        (**self).clear_directory_cache();
    }
}
