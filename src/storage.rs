//! Read-only storage for chunk gateways ([stores](store) and [storage adapters](storage_adapter)).
//!
//! A store is a system that can be used to retrieve values by [`StoreKey`].
//! For example: a filesystem, an object store bucket, or a tape archive with a staging cache.
//!
//! The gateway never writes to its stores, so this module only defines the readable halves of the Zarr abstract store interface.
//! Both a synchronous ([`ReadableStorageTraits`]) and an asynchronous ([`AsyncReadableStorageTraits`]) flavour are provided.
//!
//! See <https://zarr-specs.readthedocs.io/en/latest/v3/core/v3.0.html#abstract-store-interface>.

pub mod storage_adapter;
mod storage_async;
mod storage_sync;
pub mod store;
mod store_key;

use std::sync::Arc;

use thiserror::Error;

use crate::byte_range::InvalidByteRangeError;

pub use store_key::{StoreKey, StoreKeyError, StoreKeys};

pub use self::storage_async::{single_part_stream, AsyncReadableStorageTraits, ByteStream};
pub use self::storage_sync::ReadableStorageTraits;

/// Bytes retrieved from a store.
pub type Bytes = bytes::Bytes;

/// Bytes retrieved from a store, or [`None`] if the key does not exist.
pub type MaybeBytes = Option<Bytes>;

/// [`Arc`] wrapped readable storage.
pub type ReadableStorage = Arc<dyn ReadableStorageTraits>;

/// [`Arc`] wrapped asynchronous readable storage.
pub type AsyncReadableStorage = Arc<dyn AsyncReadableStorageTraits>;

/// A storage error.
///
/// A key which does not exist is not an error: storage methods return [`None`] instead.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An IO error.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
    /// An invalid store key.
    #[error("invalid store key {0}")]
    InvalidStoreKey(#[from] StoreKeyError),
    /// An invalid byte range.
    #[error("invalid byte range {0}")]
    InvalidByteRangeError(#[from] InvalidByteRangeError),
    /// The value exists on an archival system but has not been staged for reading yet.
    #[error("{0} is not staged yet")]
    NotStaged(StoreKey),
    /// The requested method is not supported.
    #[error("{0}")]
    Unsupported(String),
    /// Any other error.
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Returns true if the error shows that the value does not exist.
    ///
    /// A missing file or an invalid key is permanent, any other error may be transient.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::IOError(err) => err.kind() == std::io::ErrorKind::NotFound,
            Self::InvalidStoreKey(_) => true,
            _ => false,
        }
    }
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        Self::Other(err)
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Other(err.to_string())
    }
}
