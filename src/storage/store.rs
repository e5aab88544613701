//! Read-only stores.
//!
//! - [`MemoryStore`]: values held in memory, mostly useful for tests and inline data.
//! - [`FilesystemStore`]: a local (or network mounted) filesystem with a cached directory listing.
//! - [`AsyncObjectStore`]: any [`object_store::ObjectStore`], such as S3, GCS, Azure or HTTP.
//! - [`ArchivalStore`]: a tape archive fronted by a staging directory.

mod archival_store;
mod filesystem_store;
mod memory_store;
mod object_store;

pub use archival_store::{ArchivalStore, CommandRecall, RecallError, TapeRecall};
pub use filesystem_store::{FilesystemStore, FilesystemStoreCreateError, FilesystemStoreOptions};
pub use memory_store::MemoryStore;
pub use self::object_store::AsyncObjectStore;
