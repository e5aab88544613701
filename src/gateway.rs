//! The chunk gateway: serves the keys of reference manifests over HTTP.
//!
//! A request for `(dataset_id, key)` goes through these states:
//! 1. resolve the dataset in the [`DatasetCatalog`] and its chunk store in the [`StoreRegistry`],
//! 2. classify the key with [`classify_key`],
//! 3. render a metadata key from the consolidated metadata of the dataset (through the [`MetadataCache`]), or stream a data key from the chunk store,
//! 4. end as [`Outcome::Delivered`], [`Outcome::NotFound`] or [`Outcome::Unavailable`].
//!
//! Whatever the outcome, the directory cache of the chunk store is cleared and the request is recorded with the [`ResourcePressureMonitor`].

mod tape;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde_json::Value;

pub use tape::{ProbeResult, TapeOrder};

use crate::{
    chunk_store::{ChunkStore, ChunkStoreError},
    config::{CatalogFile, GatewayConfig},
    dataset::{DatasetCatalog, DatasetHandle},
    metadata::{
        classify_key, parse_json_lenient, render, root_key, ConsolidatedMetadata, KeyClass,
        MetadataCache, ZMETADATA,
    },
    pressure::{release_free_memory, ResourcePressureMonitor},
    registry::StoreRegistry,
    storage::{Bytes, ByteStream, StorageError, StoreKey},
};

/// The marker header of gateway responses.
pub const X_GATEWAY_SERVED: &str = "x-gateway-served";

/// The terminal state of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The value was delivered.
    Delivered,
    /// The dataset or key does not exist. Permanent.
    NotFound,
    /// The value could not be read. Possibly transient.
    Unavailable,
}

impl Outcome {
    /// Classify a storage error.
    ///
    /// An error showing that the value does not exist is [`Outcome::NotFound`], any other error is [`Outcome::Unavailable`].
    #[must_use]
    pub fn classify(err: &StorageError) -> Self {
        if err.is_not_found() {
            Self::NotFound
        } else {
            Self::Unavailable
        }
    }

    /// Return the HTTP status code of the outcome.
    #[must_use]
    pub fn status(self) -> StatusCode {
        match self {
            Self::Delivered => StatusCode::OK,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<&ChunkStoreError> for Outcome {
    fn from(err: &ChunkStoreError) -> Self {
        match err {
            ChunkStoreError::NotFound(_) => Self::NotFound,
            ChunkStoreError::Unavailable { .. } => Self::Unavailable,
        }
    }
}

/// The body of a [`GatewayResponse`].
pub enum ResponseBody {
    /// A short message.
    Message(&'static str),
    /// A complete value.
    Bytes(Bytes),
    /// A value delivered incrementally.
    Stream(ByteStream),
    /// No body, in answer to a `HEAD` request for a value of the given size.
    Empty(u64),
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message(message) => f.debug_tuple("Message").field(message).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
            Self::Empty(size) => f.debug_tuple("Empty").field(size).finish(),
        }
    }
}

/// A gateway response, independent of the HTTP server.
#[derive(Debug)]
pub struct GatewayResponse {
    /// The outcome.
    pub outcome: Outcome,
    /// The response headers.
    pub headers: HeaderMap,
    /// The response body.
    pub body: ResponseBody,
}

impl GatewayResponse {
    /// Return the HTTP status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.outcome.status()
    }
}

/// Why a request did not deliver a value.
#[derive(Debug)]
struct Failure {
    outcome: Outcome,
    message: &'static str,
}

impl Failure {
    const NOT_CHUNK_SERVABLE: Self = Self {
        outcome: Outcome::NotFound,
        message: "dataset is not chunk-servable",
    };
    const NOT_FOUND: Self = Self {
        outcome: Outcome::NotFound,
        message: "key not found",
    };
    const UNAVAILABLE: Self = Self {
        outcome: Outcome::Unavailable,
        message: "key is unavailable, retry later",
    };
}

impl From<ChunkStoreError> for Failure {
    fn from(err: ChunkStoreError) -> Self {
        match Outcome::from(&err) {
            Outcome::NotFound => Self::NOT_FOUND,
            _ => {
                tracing::debug!(error = %err, "chunk store read failed");
                Self::UNAVAILABLE
            }
        }
    }
}

/// Runs the per-request cleanup when a request ends, however it ends.
struct RequestGuard<'a> {
    gateway: &'a ChunkGateway,
    store: Option<Arc<ChunkStore>>,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        if let Some(store) = &self.store {
            store.clear_directory_cache();
        }
        if self.gateway.pressure.record() {
            self.gateway.schedule_reclaim();
        }
    }
}

/// Serves the keys of the reference manifests of the datasets in a catalog.
///
/// The catalog, registry, cache and pressure monitor are shared with the caller, so a gateway can be created per test or once per process.
#[derive(Debug)]
pub struct ChunkGateway {
    catalog: Arc<DatasetCatalog>,
    registry: Arc<StoreRegistry>,
    cache: MetadataCache,
    pressure: Arc<ResourcePressureMonitor>,
    config: GatewayConfig,
    last_modified: HeaderValue,
    renders: AtomicU64,
}

impl ChunkGateway {
    /// Create a new gateway with an empty catalog and registry.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let cache = MetadataCache::new(config.metadata_cache_capacity(), config.metadata_cache_ttl());
        let pressure = Arc::new(ResourcePressureMonitor::new(config.gc_limit()));
        Self::with_components(
            config,
            Arc::new(DatasetCatalog::new()),
            Arc::new(StoreRegistry::new()),
            cache,
            pressure,
        )
    }

    /// Create a new gateway from existing components.
    #[must_use]
    pub fn with_components(
        config: GatewayConfig,
        catalog: Arc<DatasetCatalog>,
        registry: Arc<StoreRegistry>,
        cache: MetadataCache,
        pressure: Arc<ResourcePressureMonitor>,
    ) -> Self {
        let last_modified = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        Self {
            catalog,
            registry,
            cache,
            pressure,
            config,
            last_modified: HeaderValue::from_str(&last_modified)
                .unwrap_or_else(|_| HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT")),
            renders: AtomicU64::new(0),
        }
    }

    /// Return the configuration.
    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Return the dataset catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<DatasetCatalog> {
        &self.catalog
    }

    /// Return the store registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    /// Return the metadata cache.
    #[must_use]
    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Return the pressure monitor.
    #[must_use]
    pub fn pressure(&self) -> &Arc<ResourcePressureMonitor> {
        &self.pressure
    }

    /// Return the number of metadata documents rendered, i.e. metadata cache misses.
    #[must_use]
    pub fn render_count(&self) -> u64 {
        self.renders.load(Ordering::Relaxed)
    }

    /// Serve `key` of the dataset `dataset_id`.
    pub async fn serve(&self, dataset_id: &str, key: &str) -> GatewayResponse {
        let mut guard = RequestGuard {
            gateway: self,
            store: None,
        };
        let (tape, result) = self.serve_key(&mut guard, dataset_id, key, false).await;
        let response = self.respond(result, tape);
        tracing::debug!(dataset_id, key, outcome = ?response.outcome, "served");
        response
    }

    /// Answer a `HEAD` request for `key` of the dataset `dataset_id`.
    ///
    /// Metadata keys are served as by [`ChunkGateway::serve`].
    /// Data keys are only sized, with a `Content-Length` header: the value is not read, and the size of a byte range reference is taken from the manifest.
    pub async fn serve_head(&self, dataset_id: &str, key: &str) -> GatewayResponse {
        let mut guard = RequestGuard {
            gateway: self,
            store: None,
        };
        let (tape, result) = self.serve_key(&mut guard, dataset_id, key, true).await;
        self.respond(result, tape)
    }

    async fn serve_key(
        &self,
        guard: &mut RequestGuard<'_>,
        dataset_id: &str,
        key: &str,
        head: bool,
    ) -> (bool, Result<ResponseBody, Failure>) {
        let (dataset, store) = match self.resolve(dataset_id) {
            Ok(resolved) => resolved,
            Err(failure) => return (false, Err(failure)),
        };
        guard.store = Some(store.clone());
        let Ok(key) = StoreKey::new(key) else {
            return (dataset.from_tape, Err(Failure::NOT_FOUND));
        };
        let result = self.deliver(&dataset, store, &key, head).await;
        (dataset.from_tape, result)
    }

    fn resolve(&self, dataset_id: &str) -> Result<(Arc<DatasetHandle>, Arc<ChunkStore>), Failure> {
        let dataset = self
            .catalog
            .get(dataset_id)
            .ok_or(Failure::NOT_CHUNK_SERVABLE)?;
        let source = dataset.source.as_deref().ok_or(Failure::NOT_CHUNK_SERVABLE)?;
        let store = self
            .registry
            .get(source)
            .map_err(|_| Failure::NOT_CHUNK_SERVABLE)?;
        Ok((dataset, store))
    }

    async fn deliver(
        &self,
        dataset: &DatasetHandle,
        store: Arc<ChunkStore>,
        key: &StoreKey,
        head: bool,
    ) -> Result<ResponseBody, Failure> {
        let class = classify_key(key);
        if class.is_metadata() {
            self.metadata(dataset, &store, key, class)
                .await
                .map(ResponseBody::Bytes)
        } else if head {
            Ok(ResponseBody::Empty(store.size(key).await?))
        } else {
            let store = self.promote(store);
            let stream = store.fetch_stream(key).await?;
            Ok(ResponseBody::Stream(stream))
        }
    }

    /// Replace a synchronous store by its asynchronous form in the registry.
    ///
    /// The registry is only updated if it still holds `store`, so a store deregistered or replaced meanwhile is never reinstated.
    /// The promoted store serves the current request either way.
    fn promote(&self, store: Arc<ChunkStore>) -> Arc<ChunkStore> {
        if !self.config.promote_to_async() || store.is_async() {
            return store;
        }
        let promoted = Arc::new(store.to_async());
        if self
            .registry
            .replace_if(store.source(), &store, promoted.clone())
        {
            tracing::debug!(source = store.source(), "promoted chunk store to async");
        } else {
            tracing::debug!(source = store.source(), "chunk store changed before promotion");
        }
        promoted
    }

    async fn metadata(
        &self,
        dataset: &DatasetHandle,
        store: &ChunkStore,
        key: &StoreKey,
        class: KeyClass,
    ) -> Result<Bytes, Failure> {
        let cache_key = MetadataCache::cache_key(&dataset.dataset_id, key);
        if let Some(bytes) = self.cache.get(&cache_key) {
            return Ok(bytes);
        }

        let root = self.root_document(store, class).await?;
        let document = render(&root, key, class).map_err(|err| {
            tracing::debug!(key = %key, error = %err, "metadata not rendered");
            Failure::NOT_FOUND
        })?;
        let bytes = Bytes::from(serde_json::to_vec(&document).map_err(|_| Failure::NOT_FOUND)?);
        self.renders.fetch_add(1, Ordering::Relaxed);
        self.cache.put(cache_key, bytes.clone(), 1);
        Ok(bytes)
    }

    /// Read the root document that metadata of class `class` is rendered from.
    ///
    /// Manifests without `.zmetadata` are consolidated from their inline metadata documents.
    async fn root_document(&self, store: &ChunkStore, class: KeyClass) -> Result<Value, Failure> {
        let root_key = StoreKey::new(root_key(class)).map_err(|_| Failure::NOT_FOUND)?;
        match store.fetch_async(&root_key, None).await {
            Ok(bytes) => parse_json_lenient(&bytes).map_err(|err| {
                tracing::warn!(source = store.source(), error = %err, "invalid root metadata document");
                Failure::NOT_FOUND
            }),
            Err(ChunkStoreError::NotFound(_)) if root_key.as_str() == ZMETADATA => {
                Ok(ConsolidatedMetadata::from_references(store.manifest()).into_value())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn respond(&self, result: Result<ResponseBody, Failure>, tape: bool) -> GatewayResponse {
        let (outcome, body) = match result {
            Ok(body) => (Outcome::Delivered, body),
            Err(failure) => (failure.outcome, ResponseBody::Message(failure.message)),
        };
        let mut headers = self.headers(outcome, tape);
        if let ResponseBody::Empty(size) = &body {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(*size));
        }
        GatewayResponse {
            outcome,
            headers,
            body,
        }
    }

    fn headers(&self, outcome: Outcome, tape: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let max_age = self.config.cache_control_max_age().as_secs();
        if let Ok(cache_control) = HeaderValue::from_str(&format!("max-age={max_age}")) {
            headers.insert(header::CACHE_CONTROL, cache_control);
        }
        headers.insert(
            HeaderName::from_static(X_GATEWAY_SERVED),
            HeaderValue::from_static("True"),
        );
        headers.insert(header::LAST_MODIFIED, self.last_modified.clone());
        if let Ok(allow_origin) = HeaderValue::from_str(self.config.allow_origin()) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
        }
        let content_type = match outcome {
            Outcome::Delivered => "application/octet-stream",
            Outcome::NotFound | Outcome::Unavailable => "text/plain; charset=utf-8",
        };
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        if tape && outcome == Outcome::Unavailable {
            headers.insert(
                header::RETRY_AFTER,
                HeaderValue::from(self.config.tape_retry_after().as_secs()),
            );
        }
        headers
    }

    /// Run a reclamation pass.
    ///
    /// Runs pending metadata cache maintenance, drops the directory listings of every chunk store and returns freed heap memory to the operating system.
    pub fn reclaim(&self) {
        run_reclamation(&self.cache, &self.registry, self.pressure.passes());
    }

    /// Run a reclamation pass on the blocking thread pool, or on the current thread outside a tokio runtime.
    fn schedule_reclaim(&self) {
        let cache = self.cache.clone();
        let registry = self.registry.clone();
        let passes = self.pressure.passes();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || run_reclamation(&cache, &registry, passes));
            }
            Err(_) => run_reclamation(&cache, &registry, passes),
        }
    }

    /// Serve the datasets of `catalog`, replacing the datasets currently served.
    ///
    /// Chunk stores are opened for new sources, and deregistered for sources no dataset refers to anymore.
    /// A dataset whose chunk store cannot be opened is still served, but is not chunk-servable.
    /// Returns the number of chunk stores opened.
    pub fn load_catalog(&self, catalog: &CatalogFile) -> usize {
        let mut opened = 0;
        for entry in &catalog.datasets {
            let Some(source) = &entry.source else {
                continue;
            };
            if self.registry.get(source).is_ok() {
                continue;
            }
            match ChunkStore::open(source, entry.storage_options.clone()) {
                Ok(store) => {
                    self.registry.register(source.clone(), Arc::new(store));
                    opened += 1;
                }
                Err(err) => tracing::warn!(
                    dataset_id = %entry.id,
                    source = %source,
                    error = %err,
                    "failed to open chunk store"
                ),
            }
        }

        let removed = self
            .catalog
            .replace_all(catalog.datasets.iter().map(|entry| entry.to_handle()).collect());
        let sources = self.catalog.sources();
        for source in self.registry.sources() {
            if sources.binary_search(&source).is_err() {
                self.registry.deregister(&source);
            }
        }
        tracing::info!(
            datasets = catalog.datasets.len(),
            removed = removed.len(),
            opened,
            "loaded catalog"
        );
        opened
    }
}

fn run_reclamation(cache: &MetadataCache, registry: &StoreRegistry, passes: u64) {
    let start = Instant::now();
    cache.run_pending_tasks();
    registry.clear_directory_caches();
    release_free_memory();
    tracing::info!(
        passes,
        elapsed_ms = start.elapsed().as_millis(),
        "reclaimed memory"
    );
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::{
        chunk_store::StoreOptions,
        reference::ReferenceManifest,
        storage::store::{ArchivalStore, MemoryStore, RecallError, TapeRecall},
    };

    pub(super) const D1_MANIFEST: &[u8] = br#"{
        ".zmetadata": "{\"zarr_consolidated_format\": 1, \"metadata\": {\".zgroup\": {\"zarr_format\": 2}, \".zattrs\": {\"_xpublish_id\": \"d1\", \"title\": \"d1\"}, \"var/.zarray\": {\"shape\": [2, 2], \"chunks\": [2, 2], \"dtype\": \"<i1\", \"fill_value\": null, \"zarr_format\": 2}}}",
        "var/.zarray": "{\"shape\": [2, 2], \"chunks\": [2, 2], \"dtype\": \"<i1\", \"zarr_format\": 2}",
        "var/0.0": "base64:AAECAw==",
        "time/0": ["/data/time.nc", 0, 4],
        "var/1.0": ["/data/staged.nc", 0, 4]
    }"#;

    pub(super) fn gateway(config: GatewayConfig) -> ChunkGateway {
        let gateway = ChunkGateway::new(config);
        let target = MemoryStore::new();
        target.set(&StoreKey::new("data/time.nc").unwrap(), vec![9u8, 8, 7, 6]);
        let manifest = ReferenceManifest::from_json(D1_MANIFEST).unwrap();
        gateway
            .registry()
            .register("refs/d1.json", Arc::new(ChunkStore::local("refs/d1.json", manifest, Arc::new(target))));
        gateway.catalog().register(DatasetHandle::from_attrs(
            "d1",
            serde_json::json!({"source": "refs/d1.json"})
                .as_object()
                .cloned()
                .unwrap(),
        ));
        gateway
    }

    pub(super) async fn body(response: GatewayResponse) -> Bytes {
        match response.body {
            ResponseBody::Message(message) => Bytes::from_static(message.as_bytes()),
            ResponseBody::Bytes(bytes) => bytes,
            ResponseBody::Empty(_) => Bytes::new(),
            ResponseBody::Stream(stream) => {
                let parts: Vec<Bytes> = stream.try_collect().await.unwrap();
                Bytes::from(parts.concat())
            }
        }
    }

    #[derive(Debug)]
    pub(super) struct NeverRecall;

    #[async_trait::async_trait]
    impl TapeRecall for NeverRecall {
        async fn recall(&self, path: &str, _destination: &std::path::Path) -> Result<(), RecallError> {
            Err(RecallError::Failed(path.to_string()))
        }
    }

    #[tokio::test]
    async fn gateway_metadata() {
        let gateway = gateway(GatewayConfig::default());

        let response = gateway.serve("d1", ".zmetadata").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers[header::CACHE_CONTROL], "max-age=604800");
        assert_eq!(response.headers[X_GATEWAY_SERVED], "True");
        assert!(response.headers.contains_key(header::LAST_MODIFIED));
        assert!(!response.headers.contains_key(header::RETRY_AFTER));
        let document: Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(document["zarr_consolidated_format"], 1);
        assert_eq!(document["metadata"]["var/.zarray"]["shape"], serde_json::json!([2, 2]));
        assert!(document["metadata"]["var/.zarray"].get("fill_value").is_none());
        assert!(document["metadata"][".zattrs"].get("_xpublish_id").is_none());

        let response = gateway.serve("d1", ".zgroup").await;
        assert_eq!(body(response).await.as_ref(), br#"{"zarr_format":2}"#);

        let response = gateway.serve("d1", "var/.zarray").await;
        let document: Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(document["dtype"], "<i1");

        let response = gateway.serve("d1", "missing/.zarray").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn gateway_metadata_cache() {
        let gateway = gateway(GatewayConfig::default());
        let first = body(gateway.serve("d1", ".zmetadata").await).await;
        let second = body(gateway.serve("d1", ".zmetadata").await).await;
        assert_eq!(first, second);
        assert_eq!(gateway.render_count(), 1);
        assert!(gateway
            .cache()
            .get(&MetadataCache::cache_key("d1", &StoreKey::new(".zmetadata").unwrap()))
            .is_some());

        // Failed renders are not cached
        gateway.serve("d1", "missing/.zarray").await;
        gateway.serve("d1", "missing/.zarray").await;
        assert_eq!(gateway.render_count(), 1);
    }

    #[tokio::test]
    async fn gateway_data() {
        let gateway = gateway(GatewayConfig::default());
        assert!(!gateway.registry().get("refs/d1.json").unwrap().is_async());

        let response = gateway.serve("d1", "var/0.0").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(body(response).await.as_ref(), &[0, 1, 2, 3]);
        assert!(gateway.registry().get("refs/d1.json").unwrap().is_async());

        let response = gateway.serve("d1", "time/0").await;
        assert_eq!(body(response).await.as_ref(), &[9, 8, 7, 6]);

        let response = gateway.serve("d1", "var/missing").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!response.headers.contains_key(header::RETRY_AFTER));

        // The target of var/1.0 does not exist
        let response = gateway.serve("d1", "var/1.0").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn gateway_data_is_repeatable() {
        let mut config = GatewayConfig::default();
        config.set_promote_to_async(false);
        let sync = gateway(config);
        let promoting = gateway(GatewayConfig::default());
        for key in ["var/0.0", "time/0"] {
            let first = body(sync.serve("d1", key).await).await;
            let second = body(sync.serve("d1", key).await).await;
            assert_eq!(first, second, "{key}");
            assert!(!sync.registry().get("refs/d1.json").unwrap().is_async());

            // The first read promotes the store, the second reads through the promoted store
            let promoted_first = body(promoting.serve("d1", key).await).await;
            assert!(promoting.registry().get("refs/d1.json").unwrap().is_async());
            let promoted_second = body(promoting.serve("d1", key).await).await;
            assert_eq!(promoted_first, promoted_second, "{key}");
            assert_eq!(first, promoted_first, "{key}");
        }
    }

    #[test]
    fn gateway_promotion_keeps_registry_changes() {
        let gateway = gateway(GatewayConfig::default());
        let store = gateway.registry().get("refs/d1.json").unwrap();
        gateway.registry().deregister("refs/d1.json");
        assert!(gateway.promote(store.clone()).is_async());
        assert!(gateway.registry().is_empty());

        // A store registered by a catalog reload is not overwritten by a stale promotion
        let reloaded = Arc::new(ChunkStore::local(
            "refs/d1.json",
            ReferenceManifest::default(),
            Arc::new(MemoryStore::new()),
        ));
        gateway.registry().register("refs/d1.json", reloaded.clone());
        gateway.promote(store);
        assert!(Arc::ptr_eq(&gateway.registry().get("refs/d1.json").unwrap(), &reloaded));
    }

    #[tokio::test]
    async fn gateway_head() {
        let gateway = gateway(GatewayConfig::default());
        let response = gateway.serve_head("d1", "time/0").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers[header::CONTENT_LENGTH], "4");
        assert!(body(response).await.is_empty());

        let response = gateway.serve_head("d1", "var/0.0").await;
        assert_eq!(response.headers[header::CONTENT_LENGTH], "4");
        let response = gateway.serve_head("d1", ".zgroup").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await.as_ref(), br#"{"zarr_format":2}"#);
        let response = gateway.serve_head("d1", "var/missing").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!response.headers.contains_key(header::CONTENT_LENGTH));
    }

    #[tokio::test]
    async fn gateway_head_does_not_recall() {
        let gateway = ChunkGateway::new(GatewayConfig::default());
        let staging = tempfile::TempDir::new().unwrap();
        let archive = Arc::new(ArchivalStore::new(staging.path(), Arc::new(NeverRecall)).unwrap());
        let manifest =
            ReferenceManifest::from_json(br#"{"var/0.0": ["/archive/var.nc", 0, 4]}"#).unwrap();
        gateway.registry().register(
            "refs/tape.json",
            Arc::new(ChunkStore::archival("refs/tape.json", manifest, archive.clone())),
        );
        gateway.catalog().register(DatasetHandle::from_attrs(
            "tape",
            serde_json::json!({"source": "refs/tape.json", "from_tape": "Yes"})
                .as_object()
                .cloned()
                .unwrap(),
        ));

        let response = gateway.serve_head("tape", "var/0.0").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers[header::CONTENT_LENGTH], "4");
        assert_eq!(archive.pending_recalls(), 0);
    }

    #[tokio::test]
    async fn gateway_not_chunk_servable() {
        let gateway = gateway(GatewayConfig::default());
        gateway
            .catalog()
            .register(DatasetHandle::from_attrs("plain", serde_json::Map::new()));
        gateway.catalog().register(DatasetHandle::from_attrs(
            "unopened",
            serde_json::json!({"source": "refs/unopened.json"})
                .as_object()
                .cloned()
                .unwrap(),
        ));
        for dataset_id in ["plain", "unopened", "unknown"] {
            let response = gateway.serve(dataset_id, "var/0.0").await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(response.headers[X_GATEWAY_SERVED], "True");
        }
    }

    #[tokio::test]
    async fn gateway_tape_unavailable() {
        let gateway = ChunkGateway::new(GatewayConfig::default());
        let staging = tempfile::TempDir::new().unwrap();
        let archive = ArchivalStore::new(staging.path(), Arc::new(NeverRecall)).unwrap();
        let manifest =
            ReferenceManifest::from_json(br#"{"var/0.0": ["/archive/var.nc", 0, 4]}"#).unwrap();
        gateway.registry().register(
            "refs/tape.json",
            Arc::new(ChunkStore::archival("refs/tape.json", manifest, Arc::new(archive))),
        );
        gateway.catalog().register(DatasetHandle::from_attrs(
            "tape",
            serde_json::json!({"source": "refs/tape.json", "from_tape": true})
                .as_object()
                .cloned()
                .unwrap(),
        ));

        let response = gateway.serve("tape", "var/0.0").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers[header::RETRY_AFTER], "10800");
        assert_eq!(
            body(response).await.as_ref(),
            Failure::UNAVAILABLE.message.as_bytes()
        );
    }

    #[tokio::test]
    async fn gateway_pressure() {
        let mut config = GatewayConfig::default();
        config.set_gc_limit(3);
        let gateway = gateway(config);
        let expected = body(gateway.serve("d1", "var/0.0").await).await;
        for _ in 0..3 {
            // The request crossing the limit is answered while reclamation runs in the background
            assert_eq!(body(gateway.serve("d1", "var/0.0").await).await, expected);
        }
        assert_eq!(gateway.pressure().passes(), 1);
        assert_eq!(gateway.pressure().count(), 0);
        // Requests which fail are counted too
        gateway.serve("unknown", "var/0.0").await;
        assert_eq!(gateway.pressure().count(), 1);
    }

    #[tokio::test]
    async fn gateway_load_catalog() {
        let refs = tempfile::TempDir::new().unwrap();
        let d1 = refs.path().join("d1.json");
        std::fs::write(&d1, D1_MANIFEST).unwrap();
        let source = format!("reference::{}", d1.display());

        let gateway = ChunkGateway::new(GatewayConfig::default());
        let catalog = CatalogFile {
            datasets: vec![
                crate::config::CatalogEntry {
                    id: "d1".to_string(),
                    source: Some(source.clone()),
                    from_tape: false,
                    attrs: serde_json::Map::new(),
                    storage_options: StoreOptions {
                        lazy: true,
                        ..StoreOptions::default()
                    },
                },
                crate::config::CatalogEntry {
                    id: "broken".to_string(),
                    source: Some("reference::/does/not/exist.json".to_string()),
                    from_tape: false,
                    attrs: serde_json::Map::new(),
                    storage_options: StoreOptions::default(),
                },
            ],
        };
        assert_eq!(gateway.load_catalog(&catalog), 1);
        assert_eq!(gateway.catalog().ids(), vec!["broken", "d1"]);
        assert_eq!(gateway.registry().sources(), vec![source.clone()]);
        let response = gateway.serve("d1", "var/0.0").await;
        assert_eq!(body(response).await.as_ref(), &[0, 1, 2, 3]);
        assert_eq!(gateway.serve("broken", ".zgroup").await.status(), StatusCode::NOT_FOUND);

        assert_eq!(gateway.load_catalog(&CatalogFile::default()), 0);
        assert!(gateway.catalog().ids().is_empty());
        assert!(gateway.registry().is_empty());
    }
}
