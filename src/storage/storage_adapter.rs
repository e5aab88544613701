//! Storage adapters.
//!
//! An adapter wraps a store and exposes it through another storage interface.

mod sync_to_async;

pub use self::sync_to_async::SyncToAsyncStorageAdapter;
