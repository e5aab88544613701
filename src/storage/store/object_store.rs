use futures::{StreamExt, TryStreamExt};
use object_store::{path::Path, GetOptions, GetRange};

use crate::{
    byte_range::{validate_byte_ranges, ByteRange},
    storage::{AsyncReadableStorageTraits, Bytes, ByteStream, StorageError, StoreKey},
};

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        Self::Other(err.to_string())
    }
}

fn handle_result<T>(result: Result<T, object_store::Error>) -> Result<Option<T>, StorageError> {
    match result {
        Ok(result) => Ok(Some(result)),
        Err(err) => {
            if matches!(err, object_store::Error::NotFound { .. }) {
                Ok(None)
            } else {
                Err(err.into())
            }
        }
    }
}

/// An asynchronous store backed by an [`object_store::ObjectStore`].
///
/// Keys are resolved relative to an optional `prefix` inside the object store.
pub struct AsyncObjectStore<T> {
    object_store: T,
    prefix: Path,
}

impl<T: object_store::ObjectStore> AsyncObjectStore<T> {
    /// Create a new [`AsyncObjectStore`].
    #[must_use]
    pub fn new(object_store: T) -> Self {
        Self {
            object_store,
            prefix: Path::default(),
        }
    }

    /// Resolve keys relative to `prefix`.
    #[must_use]
    pub fn with_prefix(mut self, prefix: Path) -> Self {
        self.prefix = prefix;
        self
    }

    fn key_to_path(&self, key: &StoreKey) -> Path {
        if self.prefix.as_ref().is_empty() {
            Path::from(key.as_str())
        } else {
            Path::from(format!("{}/{}", self.prefix, key.as_str()))
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for AsyncObjectStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncObjectStore")
            .field("object_store", &self.object_store)
            .field("prefix", &self.prefix)
            .finish()
    }
}

#[async_trait::async_trait]
impl<T: object_store::ObjectStore> AsyncReadableStorageTraits for AsyncObjectStore<T> {
    async fn get(&self, key: &StoreKey) -> Result<Option<Bytes>, StorageError> {
        let get = handle_result(self.object_store.get(&self.key_to_path(key)).await)?;
        if let Some(get) = get {
            let bytes = get.bytes().await?;
            Ok(Some(bytes))
        } else {
            Ok(None)
        }
    }

    async fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        let Some(size) = self.size_key(key).await? else {
            return Ok(None);
        };
        validate_byte_ranges(byte_ranges, size)?;
        let ranges = byte_ranges
            .iter()
            .map(|byte_range| byte_range.to_range_usize(size))
            .collect::<Result<Vec<_>, _>>()?;
        let Some(get_ranges) = handle_result(
            self.object_store
                .get_ranges(&self.key_to_path(key), &ranges)
                .await,
        )?
        else {
            return Ok(None);
        };
        Ok(Some(
            std::iter::zip(ranges, get_ranges)
                .map(|(range, bytes)| {
                    if range.len() == bytes.len() {
                        Ok(bytes)
                    } else {
                        Err(StorageError::Other(format!(
                            "Unexpected length of bytes returned, expected {}, got {}",
                            range.len(),
                            bytes.len()
                        )))
                    }
                })
                .collect::<Result<_, StorageError>>()?,
        ))
    }

    async fn get_stream(
        &self,
        key: &StoreKey,
        byte_range: ByteRange,
    ) -> Result<Option<ByteStream>, StorageError> {
        let Some(size) = self.size_key(key).await? else {
            return Ok(None);
        };
        validate_byte_ranges(std::slice::from_ref(&byte_range), size)?;
        let options = GetOptions {
            range: Some(GetRange::Bounded(byte_range.to_range_usize(size)?)),
            ..Default::default()
        };
        let Some(get) = handle_result(
            self.object_store
                .get_opts(&self.key_to_path(key), options)
                .await,
        )?
        else {
            return Ok(None);
        };
        Ok(Some(get.into_stream().map_err(StorageError::from).boxed()))
    }

    async fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        Ok(
            handle_result(self.object_store.head(&self.key_to_path(key)).await)?
                .map(|meta| meta.size as u64),
        )
    }
}
