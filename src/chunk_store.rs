//! Chunk stores: reference manifests bound to the storage holding their targets.
//!
//! A [`ChunkStore`] wraps one `source`, the address of a reference manifest such as `reference::/pool/refs/d1.json`.
//! The manifest is read once when the store is opened.
//! Its targets are read through one of three backends, selected by the `remote_protocol` option:
//! - `file` (default) or `memory`: a local [`FilesystemStore`] rooted at `/`, or an empty [`MemoryStore`] for manifests with inline values only,
//! - `s3`, `gs`, `az`, `http` or `https`: an [`AsyncObjectStore`] configured from `remote_options`,
//! - `slk` or `tape`: an [`ArchivalStore`] staging recalled files in `remote_options.slk_cache`.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    byte_range::{ByteLength, ByteRange},
    reference::{target_origin, ReferenceError, ReferenceManifest, ReferenceStore},
    storage::{
        storage_adapter::SyncToAsyncStorageAdapter,
        store::{
            ArchivalStore, AsyncObjectStore, CommandRecall, FilesystemStore,
            FilesystemStoreCreateError, FilesystemStoreOptions, MemoryStore,
        },
        AsyncReadableStorage, AsyncReadableStorageTraits, Bytes, ByteStream, ReadableStorage,
        ReadableStorageTraits, StorageError, StoreKey,
    },
};

/// The `remote_options` entry naming the staging directory of tape-backed stores.
pub const SLK_CACHE: &str = "slk_cache";

const REFERENCE_PREFIX: &str = "reference::";

/// Options fixed when a [`ChunkStore`] is opened.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// The protocol of the reference targets. Defaults to `file`.
    pub remote_protocol: Option<String>,
    /// Defer listing the target directory until the first read.
    pub lazy: bool,
    /// The byte budget of the read cache of local targets. Zero disables it.
    pub cache_size: u64,
    /// Transport options, such as object store credentials or the tape staging directory.
    pub remote_options: BTreeMap<String, Value>,
}

impl StoreOptions {
    fn remote_option(&self, name: &str) -> Option<String> {
        self.remote_options.get(name).map(|value| match value {
            Value::String(value) => value.clone(),
            value => value.to_string(),
        })
    }
}

/// The backend of a [`ChunkStore`].
pub enum ChunkStoreBackend {
    /// References to local files (or inline values only).
    Local {
        /// The reference store.
        references: ReadableStorage,
        /// The async form of `references`, once promoted.
        asynchronous: Option<AsyncReadableStorage>,
    },
    /// References to objects of an object store.
    Object {
        /// The reference store.
        references: AsyncReadableStorage,
    },
    /// References to files of a tape archive.
    Archival {
        /// The reference store.
        references: ReadableStorage,
        /// The async form of `references`, once promoted.
        asynchronous: Option<AsyncReadableStorage>,
        /// The staging directory of recalled files.
        staging: PathBuf,
    },
}

impl std::fmt::Debug for ChunkStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { asynchronous, .. } => f
                .debug_struct("Local")
                .field("asynchronous", &asynchronous.is_some())
                .finish_non_exhaustive(),
            Self::Object { .. } => f.debug_struct("Object").finish_non_exhaustive(),
            Self::Archival {
                asynchronous,
                staging,
                ..
            } => f
                .debug_struct("Archival")
                .field("asynchronous", &asynchronous.is_some())
                .field("staging", staging)
                .finish_non_exhaustive(),
        }
    }
}

/// A chunk store error.
#[derive(Debug, Error)]
pub enum ChunkStoreError {
    /// The key is not in the manifest, or its target does not exist.
    #[error("{0} not found")]
    NotFound(StoreKey),
    /// The value could not be read, possibly only for now.
    #[error("{key} is unavailable: {source}")]
    Unavailable {
        /// The key.
        key: StoreKey,
        /// The underlying storage error.
        source: StorageError,
    },
}

impl ChunkStoreError {
    /// Classify a [`StorageError`] raised reading `key`.
    ///
    /// Errors which show the value can never exist are [`ChunkStoreError::NotFound`], anything else is [`ChunkStoreError::Unavailable`].
    #[must_use]
    pub fn from_storage_error(key: &StoreKey, err: StorageError) -> Self {
        if err.is_not_found() {
            Self::NotFound(key.clone())
        } else {
            Self::Unavailable {
                key: key.clone(),
                source: err,
            }
        }
    }

    /// Returns true if this is [`ChunkStoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

fn classify<T>(key: &StoreKey, result: Result<Option<T>, StorageError>) -> Result<T, ChunkStoreError> {
    match result {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(ChunkStoreError::NotFound(key.clone())),
        Err(err) => Err(ChunkStoreError::from_storage_error(key, err)),
    }
}

/// A chunk store creation error.
#[derive(Debug, Error)]
pub enum ChunkStoreCreateError {
    /// The reference manifest could not be read.
    #[error(transparent)]
    ReferenceError(#[from] ReferenceError),
    /// The local target store could not be created.
    #[error(transparent)]
    FilesystemStoreCreateError(#[from] FilesystemStoreCreateError),
    /// The object store could not be created.
    #[error(transparent)]
    ObjectStoreError(#[from] object_store::Error),
    /// A target URL is not valid.
    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),
    /// The remote protocol is not supported.
    #[error("unsupported remote protocol {0}")]
    UnsupportedProtocol(String),
    /// A required remote option is missing.
    #[error("remote option {0} is required")]
    MissingRemoteOption(&'static str),
    /// The targets of an object store manifest do not share one origin.
    #[error("references must target exactly one object store origin, found {0:?}")]
    TargetOrigins(Vec<String>),
}

/// A reference manifest bound to the storage of its targets.
///
/// A chunk store is either synchronous or has been promoted to an asynchronous form with [`ChunkStore::to_async`].
/// Object store backed chunk stores are always asynchronous.
#[derive(Debug)]
pub struct ChunkStore {
    source: String,
    options: StoreOptions,
    manifest: Arc<ReferenceManifest>,
    backend: ChunkStoreBackend,
}

impl ChunkStore {
    /// Open the chunk store for `source` with `options`.
    ///
    /// `source` is the path of a reference manifest on the local filesystem, optionally prefixed with `reference::`.
    ///
    /// # Errors
    /// Returns a [`ChunkStoreCreateError`] if the manifest cannot be read or the target storage cannot be created.
    pub fn open(source: &str, options: StoreOptions) -> Result<Self, ChunkStoreCreateError> {
        let path = source.strip_prefix(REFERENCE_PREFIX).unwrap_or(source);
        let path = path.strip_prefix("file://").unwrap_or(path);
        let manifest = Arc::new(ReferenceManifest::from_path(path)?);

        let protocol = options
            .remote_protocol
            .clone()
            .unwrap_or_else(|| "file".to_string());
        let backend = match protocol.as_str() {
            "file" | "local" => {
                let target = FilesystemStore::new_with_options(
                    "/",
                    FilesystemStoreOptions {
                        lazy: options.lazy,
                        cache_size: options.cache_size,
                    },
                )?;
                Self::local_backend(&manifest, Arc::new(target))
            }
            "memory" => Self::local_backend(&manifest, Arc::new(MemoryStore::new())),
            "s3" | "s3a" | "gs" | "gcs" | "az" | "abfs" | "azure" | "http" | "https" => {
                let origins: Vec<String> = manifest
                    .target_urls()
                    .into_iter()
                    .filter_map(target_origin)
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let [origin] = origins.as_slice() else {
                    return Err(ChunkStoreCreateError::TargetOrigins(origins));
                };
                let url = url::Url::parse(origin)?;
                let remote_options = options
                    .remote_options
                    .keys()
                    .filter_map(|name| Some((name.clone(), options.remote_option(name)?)));
                let (object_store, _) = object_store::parse_url_opts(&url, remote_options)?;
                Self::object_backend(&manifest, Arc::new(AsyncObjectStore::new(object_store)))
            }
            "slk" | "tape" => {
                let staging = options
                    .remote_option(SLK_CACHE)
                    .ok_or(ChunkStoreCreateError::MissingRemoteOption(SLK_CACHE))?;
                let target = ArchivalStore::new(&staging, Arc::new(CommandRecall::default()))?;
                Self::archival_backend(&manifest, Arc::new(target))
            }
            protocol => {
                return Err(ChunkStoreCreateError::UnsupportedProtocol(
                    protocol.to_string(),
                ))
            }
        };

        tracing::info!(
            source,
            protocol = %protocol,
            references = manifest.len(),
            "opened chunk store"
        );
        Ok(Self {
            source: source.to_string(),
            options,
            manifest,
            backend,
        })
    }

    fn local_backend(
        manifest: &Arc<ReferenceManifest>,
        target: ReadableStorage,
    ) -> ChunkStoreBackend {
        ChunkStoreBackend::Local {
            references: Arc::new(ReferenceStore::new(manifest.clone(), target)),
            asynchronous: None,
        }
    }

    fn object_backend(
        manifest: &Arc<ReferenceManifest>,
        target: AsyncReadableStorage,
    ) -> ChunkStoreBackend {
        ChunkStoreBackend::Object {
            references: Arc::new(ReferenceStore::new(manifest.clone(), target)),
        }
    }

    fn archival_backend(
        manifest: &Arc<ReferenceManifest>,
        target: Arc<ArchivalStore>,
    ) -> ChunkStoreBackend {
        let staging = target.staging_path().to_path_buf();
        ChunkStoreBackend::Archival {
            references: Arc::new(ReferenceStore::new(manifest.clone(), target)),
            asynchronous: None,
            staging,
        }
    }

    /// Create a chunk store for `manifest` with targets in the synchronous `target` store.
    #[must_use]
    pub fn local(source: &str, manifest: ReferenceManifest, target: ReadableStorage) -> Self {
        let manifest = Arc::new(manifest);
        Self {
            source: source.to_string(),
            options: StoreOptions::default(),
            backend: Self::local_backend(&manifest, target),
            manifest,
        }
    }

    /// Create a chunk store for `manifest` with targets in the asynchronous `target` store.
    #[must_use]
    pub fn object(source: &str, manifest: ReferenceManifest, target: AsyncReadableStorage) -> Self {
        let manifest = Arc::new(manifest);
        Self {
            source: source.to_string(),
            options: StoreOptions::default(),
            backend: Self::object_backend(&manifest, target),
            manifest,
        }
    }

    /// Create a chunk store for `manifest` with targets in the tape archive `target`.
    #[must_use]
    pub fn archival(source: &str, manifest: ReferenceManifest, target: Arc<ArchivalStore>) -> Self {
        let manifest = Arc::new(manifest);
        Self {
            source: source.to_string(),
            options: StoreOptions::default(),
            backend: Self::archival_backend(&manifest, target),
            manifest,
        }
    }

    /// Return the source of the chunk store.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Return the options the chunk store was opened with.
    #[must_use]
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Return the reference manifest.
    #[must_use]
    pub fn manifest(&self) -> &Arc<ReferenceManifest> {
        &self.manifest
    }

    /// Return the backend.
    #[must_use]
    pub fn backend(&self) -> &ChunkStoreBackend {
        &self.backend
    }

    /// Returns true if the chunk store reads from a tape archive.
    #[must_use]
    pub fn is_tape(&self) -> bool {
        matches!(self.backend, ChunkStoreBackend::Archival { .. })
    }

    /// Returns true if the chunk store has an asynchronous form.
    #[must_use]
    pub fn is_async(&self) -> bool {
        match &self.backend {
            ChunkStoreBackend::Object { .. } => true,
            ChunkStoreBackend::Local { asynchronous, .. }
            | ChunkStoreBackend::Archival { asynchronous, .. } => asynchronous.is_some(),
        }
    }

    /// Return the asynchronous form of this chunk store.
    ///
    /// Reads of the asynchronous form of a synchronous store run on the blocking thread pool.
    /// The returned store shares the manifest and target storage of this store, and should replace it in the [`StoreRegistry`](crate::registry::StoreRegistry).
    #[must_use]
    pub fn to_async(&self) -> Self {
        let backend = match &self.backend {
            ChunkStoreBackend::Local { references, .. } => ChunkStoreBackend::Local {
                references: references.clone(),
                asynchronous: Some(Arc::new(SyncToAsyncStorageAdapter::new(references.clone()))),
            },
            ChunkStoreBackend::Object { references } => ChunkStoreBackend::Object {
                references: references.clone(),
            },
            ChunkStoreBackend::Archival {
                references,
                staging,
                ..
            } => ChunkStoreBackend::Archival {
                references: references.clone(),
                asynchronous: Some(Arc::new(SyncToAsyncStorageAdapter::new(references.clone()))),
                staging: staging.clone(),
            },
        };
        Self {
            source: self.source.clone(),
            options: self.options.clone(),
            manifest: self.manifest.clone(),
            backend,
        }
    }

    fn async_storage(&self) -> AsyncReadableStorage {
        match &self.backend {
            ChunkStoreBackend::Object { references } => references.clone(),
            ChunkStoreBackend::Local {
                references,
                asynchronous,
            }
            | ChunkStoreBackend::Archival {
                references,
                asynchronous,
                ..
            } => asynchronous.clone().unwrap_or_else(|| {
                Arc::new(SyncToAsyncStorageAdapter::new(references.clone()))
            }),
        }
    }

    /// Read the value at `key`, blocking the current thread.
    ///
    /// Object store backed chunk stores drive their read to completion on the current thread, so this must not be called from async code.
    ///
    /// # Errors
    /// Returns [`ChunkStoreError::NotFound`] if `key` is not in the manifest or its target does not exist, and [`ChunkStoreError::Unavailable`] if the read fails.
    pub fn get(&self, key: &StoreKey) -> Result<Bytes, ChunkStoreError> {
        let result = match &self.backend {
            ChunkStoreBackend::Local { references, .. }
            | ChunkStoreBackend::Archival { references, .. } => references.get(key),
            ChunkStoreBackend::Object { references } => {
                futures::executor::block_on(references.get(key))
            }
        };
        classify(key, result)
    }

    /// Read the value at `key` asynchronously.
    ///
    /// If `range_hint` is set, only the first `range_hint` bytes are read.
    ///
    /// # Errors
    /// Returns [`ChunkStoreError::NotFound`] if `key` is not in the manifest or its target does not exist, and [`ChunkStoreError::Unavailable`] if the read fails.
    pub async fn fetch_async(
        &self,
        key: &StoreKey,
        range_hint: Option<ByteLength>,
    ) -> Result<Bytes, ChunkStoreError> {
        let storage = self.async_storage();
        let Some(length) = range_hint else {
            return classify(key, storage.get(key).await);
        };
        let size = classify(key, storage.size_key(key).await)?;
        let byte_range = ByteRange::FromStart(0, Some(length)).clamp(size);
        let values = classify(
            key,
            storage.get_partial_values_key(key, &[byte_range]).await,
        )?;
        values
            .into_iter()
            .next()
            .ok_or_else(|| ChunkStoreError::NotFound(key.clone()))
    }

    /// Return the size of the value at `key` without reading it.
    ///
    /// The size of a byte range reference is taken from the manifest, so its target is not accessed.
    ///
    /// # Errors
    /// Returns [`ChunkStoreError::NotFound`] if `key` is not in the manifest or its target does not exist, and [`ChunkStoreError::Unavailable`] if the size cannot be determined.
    pub async fn size(&self, key: &StoreKey) -> Result<u64, ChunkStoreError> {
        classify(key, self.async_storage().size_key(key).await)
    }

    /// Read the value at `key` asynchronously as a stream of parts.
    ///
    /// Dropping the stream abandons the read.
    ///
    /// # Errors
    /// Returns [`ChunkStoreError::NotFound`] if `key` is not in the manifest or its target does not exist, and [`ChunkStoreError::Unavailable`] if the read cannot be started.
    pub async fn fetch_stream(&self, key: &StoreKey) -> Result<ByteStream, ChunkStoreError> {
        classify(
            key,
            self.async_storage().get_stream(key, ByteRange::ALL).await,
        )
    }

    /// Drop the cached directory listings of the target storage.
    pub fn clear_directory_cache(&self) {
        match &self.backend {
            ChunkStoreBackend::Local { references, .. }
            | ChunkStoreBackend::Archival { references, .. } => {
                references.clear_directory_cache();
            }
            ChunkStoreBackend::Object { references } => references.clear_directory_cache(),
        }
    }
}
