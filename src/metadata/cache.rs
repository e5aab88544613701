use std::time::Duration;

use moka::{policy::EvictionPolicy, sync::Cache};

use crate::storage::{Bytes, StoreKey};

#[derive(Clone, Debug)]
struct CachedDocument {
    bytes: Bytes,
    cost: u32,
}

/// A bounded cache of rendered metadata documents.
///
/// Entries are weighted by the cost given to [`MetadataCache::put`] and expire after a fixed time to live.
/// Documents are never invalidated: the metadata of a dataset does not change for the lifetime of its identifier.
#[derive(Clone)]
pub struct MetadataCache {
    cache: Cache<String, CachedDocument>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl MetadataCache {
    /// Create a new [`MetadataCache`] holding up to `capacity` in total cost for `time_to_live`.
    #[must_use]
    pub fn new(capacity: u64, time_to_live: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(time_to_live)
            .weigher(|_key: &String, document: &CachedDocument| document.cost)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { cache }
    }

    /// Return the cache key of the metadata `key` of `dataset_id`.
    #[must_use]
    pub fn cache_key(dataset_id: &str, key: &StoreKey) -> String {
        format!("{dataset_id}/manifest/{key}")
    }

    /// Return the cached document for `cache_key`.
    #[must_use]
    pub fn get(&self, cache_key: &str) -> Option<Bytes> {
        self.cache.get(cache_key).map(|document| document.bytes)
    }

    /// Cache the rendered document `bytes` for `cache_key` with weight `cost`.
    ///
    /// Concurrent puts for the same key race, the last one wins.
    pub fn put(&self, cache_key: String, bytes: Bytes, cost: u32) {
        self.cache.insert(cache_key, CachedDocument { bytes, cost });
    }

    /// Return the approximate number of cached documents.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Run pending maintenance such as evictions and expirations.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_cache() {
        let cache = MetadataCache::new(2, Duration::from_secs(60));
        let key = StoreKey::new("tas/.zarray").unwrap();
        let cache_key = MetadataCache::cache_key("d1", &key);
        assert_eq!(cache_key, "d1/manifest/tas/.zarray");
        assert_ne!(cache_key, MetadataCache::cache_key("d2", &key));

        assert!(cache.get(&cache_key).is_none());
        cache.put(cache_key.clone(), Bytes::from_static(b"{}"), 1);
        assert_eq!(cache.get(&cache_key).unwrap().as_ref(), b"{}");
        cache.put(cache_key.clone(), Bytes::from_static(b"[]"), 1);
        assert_eq!(cache.get(&cache_key).unwrap().as_ref(), b"[]");

        cache.put("a".to_string(), Bytes::new(), 1);
        cache.put("b".to_string(), Bytes::new(), 1);
        cache.run_pending_tasks();
        assert!(cache.entry_count() <= 2);
    }

    #[test]
    fn metadata_cache_expiry() {
        let cache = MetadataCache::new(16, Duration::from_millis(1));
        cache.put("a".to_string(), Bytes::new(), 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("a").is_none());
    }
}
