//! The registry of live chunk stores.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use thiserror::Error;

use crate::chunk_store::ChunkStore;

/// A store registry error.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No chunk store is registered for the source.
    #[error("no chunk store is registered for {0}")]
    NotFound(String),
}

/// Maps each `source` to its one live [`ChunkStore`].
///
/// Stores are only ever installed explicitly, [`StoreRegistry::get`] never opens one.
/// Registering a source which is already registered replaces its store, the last write wins.
/// Readers hold their own [`Arc`] to a store, so a replaced store stays usable by in-flight requests.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: RwLock<HashMap<String, Arc<ChunkStore>>>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `store` for `source`.
    pub fn register(&self, source: impl Into<String>, store: Arc<ChunkStore>) {
        let source = source.into();
        tracing::info!(source = %source, "registered chunk store");
        self.stores.write().insert(source, store);
    }

    /// Return the store for `source`.
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] if no store is registered for `source`.
    pub fn get(&self, source: &str) -> Result<Arc<ChunkStore>, RegistryError> {
        self.stores
            .read()
            .get(source)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(source.to_string()))
    }

    /// Atomically replace the store for `source`, returning the previous store.
    pub fn replace(&self, source: impl Into<String>, store: Arc<ChunkStore>) -> Option<Arc<ChunkStore>> {
        self.stores.write().insert(source.into(), store)
    }

    /// Replace the store for `source` with `store`, but only if the registered store is still `expected`.
    ///
    /// Returns false, leaving the registry unchanged, if `source` was deregistered or its store was replaced since `expected` was read.
    pub fn replace_if(&self, source: &str, expected: &Arc<ChunkStore>, store: Arc<ChunkStore>) -> bool {
        let mut stores = self.stores.write();
        match stores.get_mut(source) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                *current = store;
                true
            }
            _ => false,
        }
    }

    /// Remove the store for `source`.
    pub fn deregister(&self, source: &str) -> Option<Arc<ChunkStore>> {
        let store = self.stores.write().remove(source);
        if store.is_some() {
            tracing::info!(source, "deregistered chunk store");
        }
        store
    }

    /// Return the registered sources.
    #[must_use]
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.stores.read().keys().cloned().collect();
        sources.sort();
        sources
    }

    /// Return the number of registered stores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    /// Returns true if no stores are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.read().is_empty()
    }

    /// Drop the cached directory listings of every registered store.
    pub fn clear_directory_caches(&self) {
        let stores: Vec<Arc<ChunkStore>> = self.stores.read().values().cloned().collect();
        for store in stores {
            store.clear_directory_cache();
        }
    }
}
