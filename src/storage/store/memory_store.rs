use parking_lot::RwLock;

use crate::{
    byte_range::{extract_byte_ranges, ByteRange},
    storage::{Bytes, MaybeBytes, ReadableStorageTraits, StorageError, StoreKey},
};

use std::collections::BTreeMap;

/// A synchronous in-memory store.
///
/// Values are inserted with [`MemoryStore::set`] and are shared rather than copied when read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data_map: RwLock<BTreeMap<StoreKey, Bytes>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` at `key`, replacing any existing value.
    pub fn set(&self, key: &StoreKey, value: impl Into<Bytes>) {
        self.data_map.write().insert(key.clone(), value.into());
    }

    /// Return the number of values in the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data_map.read().len()
    }

    /// Returns true if the store holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data_map.read().is_empty()
    }
}

impl ReadableStorageTraits for MemoryStore {
    fn get(&self, key: &StoreKey) -> Result<MaybeBytes, StorageError> {
        Ok(self.data_map.read().get(key).cloned())
    }

    fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        let Some(data) = self.data_map.read().get(key).cloned() else {
            return Ok(None);
        };
        Ok(Some(extract_byte_ranges(&data, byte_ranges)?))
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        Ok(self
            .data_map
            .read()
            .get(key)
            .map(|data| data.len() as u64))
    }
}
