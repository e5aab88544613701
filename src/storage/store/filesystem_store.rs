//! A read-only filesystem store.
//!
//! Keys are resolved relative to a base directory.
//! Reads open files directly and never list a directory.
//! Listings taken when the store is opened answer lookups of missing files until [`ReadableStorageTraits::clear_directory_cache`] is called.

use crate::{
    byte_range::{validate_byte_ranges, ByteRange},
    storage::{Bytes, ReadableStorageTraits, StorageError, StoreKey},
};

use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;
use walkdir::WalkDir;

use std::{
    collections::{BTreeSet, HashMap},
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

/// Options for a [`FilesystemStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilesystemStoreOptions {
    /// Defer listing the base directory until the first read.
    pub lazy: bool,
    /// The byte budget of the read cache. Zero disables it.
    pub cache_size: u64,
}

type ReadCacheKey = (PathBuf, u64, u64);

#[derive(Debug)]
struct ReadCache {
    entries: LruCache<ReadCacheKey, Bytes>,
    size: u64,
    budget: u64,
}

impl ReadCache {
    fn new(budget: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            size: 0,
            budget,
        }
    }

    fn get(&mut self, key: &ReadCacheKey) -> Option<Bytes> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: ReadCacheKey, bytes: Bytes) {
        let len = bytes.len() as u64;
        if len > self.budget {
            return;
        }
        if let Some(previous) = self.entries.put(key, bytes) {
            self.size -= previous.len() as u64;
        }
        self.size += len;
        while self.size > self.budget {
            match self.entries.pop_lru() {
                Some((_, evicted)) => self.size -= evicted.len() as u64,
                None => break,
            }
        }
    }
}

/// A synchronous read-only file system store.
#[derive(Debug)]
pub struct FilesystemStore {
    base_path: PathBuf,
    listings: Mutex<HashMap<PathBuf, Arc<BTreeSet<String>>>>,
    read_cache: Option<Mutex<ReadCache>>,
}

impl FilesystemStore {
    /// Create a new file system store at a given `base_path` with default options.
    ///
    /// # Errors
    /// Returns a [`FilesystemStoreCreateError`] if `base_path` is not valid or is not a directory.
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, FilesystemStoreCreateError> {
        Self::new_with_options(base_path, FilesystemStoreOptions::default())
    }

    /// Create a new file system store at a given `base_path` with non-default `options`.
    ///
    /// Unless `options.lazy` is set the base directory is listed immediately.
    ///
    /// # Errors
    /// Returns a [`FilesystemStoreCreateError`] if `base_path`:
    ///   - is not valid, or
    ///   - points to an existing file rather than a directory, or
    ///   - cannot be listed (non-lazy only).
    pub fn new_with_options<P: AsRef<Path>>(
        base_path: P,
        options: FilesystemStoreOptions,
    ) -> Result<Self, FilesystemStoreCreateError> {
        let base_path = base_path.as_ref().to_path_buf();
        if base_path.to_str().is_none() {
            return Err(FilesystemStoreCreateError::InvalidBasePath(base_path));
        }
        if base_path.is_file() {
            return Err(FilesystemStoreCreateError::InvalidBasePath(base_path));
        }

        let store = Self {
            base_path,
            listings: Mutex::default(),
            read_cache: (options.cache_size > 0)
                .then(|| Mutex::new(ReadCache::new(options.cache_size))),
        };
        if !options.lazy {
            store.listing(&store.base_path)?;
        }
        Ok(store)
    }

    /// Return the base path of the store.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Maps a [`StoreKey`] to a filesystem [`PathBuf`].
    #[must_use]
    pub fn key_to_fspath(&self, key: &StoreKey) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(key.as_str());
        path
    }

    /// Return the number of directory listings currently cached.
    #[must_use]
    pub fn cached_listings(&self) -> usize {
        self.listings.lock().len()
    }

    fn listing(&self, directory: &Path) -> Result<Arc<BTreeSet<String>>, std::io::Error> {
        if let Some(listing) = self.listings.lock().get(directory) {
            return Ok(listing.clone());
        }

        let mut names = BTreeSet::new();
        for entry in WalkDir::new(directory).min_depth(1).max_depth(1) {
            let entry = entry.map_err(std::io::Error::from)?;
            names.insert(entry.file_name().to_string_lossy().into_owned());
        }
        let listing = Arc::new(names);
        self.listings
            .lock()
            .insert(directory.to_path_buf(), listing.clone());
        Ok(listing)
    }

    /// Returns true if a cached listing of the parent of `path` shows the file does not exist.
    ///
    /// Directories without a cached listing are not listed.
    fn listed_as_missing(&self, path: &Path) -> bool {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return false;
        };
        self.listings
            .lock()
            .get(parent)
            .is_some_and(|listing| !listing.contains(name.to_string_lossy().as_ref()))
    }

    fn read_range(file: &mut File, start: u64, length: u64) -> Result<Bytes, StorageError> {
        file.seek(SeekFrom::Start(start))?;
        let length = usize::try_from(length)
            .map_err(|_| StorageError::Other(format!("cannot read {length} bytes into memory")))?;
        let mut buffer = vec![0; length];
        file.read_exact(&mut buffer)?;
        Ok(Bytes::from(buffer))
    }
}

impl ReadableStorageTraits for FilesystemStore {
    fn get_partial_values_key(
        &self,
        key: &StoreKey,
        byte_ranges: &[ByteRange],
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        let path = self.key_to_fspath(key);
        if self.listed_as_missing(&path) {
            return Ok(None);
        }

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let size = file.metadata()?.len();
        validate_byte_ranges(byte_ranges, size)?;

        let mut out = Vec::with_capacity(byte_ranges.len());
        for byte_range in byte_ranges {
            let range = byte_range.to_range(size);
            let cache_key = (path.clone(), range.start, range.end);
            if let Some(cache) = &self.read_cache {
                if let Some(bytes) = cache.lock().get(&cache_key) {
                    out.push(bytes);
                    continue;
                }
            }
            let bytes = Self::read_range(&mut file, range.start, range.end - range.start)?;
            if let Some(cache) = &self.read_cache {
                cache.lock().put(cache_key, bytes.clone());
            }
            out.push(bytes);
        }
        Ok(Some(out))
    }

    fn size_key(&self, key: &StoreKey) -> Result<Option<u64>, StorageError> {
        let path = self.key_to_fspath(key);
        if self.listed_as_missing(&path) {
            return Ok(None);
        }
        match std::fs::metadata(path) {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn clear_directory_cache(&self) {
        self.listings.lock().clear();
    }
}

/// A filesystem store creation error.
#[derive(Debug, Error)]
pub enum FilesystemStoreCreateError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// An invalid base path.
    #[error("base path {0} is not valid")]
    InvalidBasePath(PathBuf),
}
