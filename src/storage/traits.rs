//! Backend interface for the local durable cache.

use crate::error::StorageError;

/// Result type for raw backend calls.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Persistent key → value store that survives process restarts.
///
/// Values are opaque strings (JSON encoded by `LocalCache`). Each key is an
/// independent slot; there are no partial or indexed updates.
///
/// # Threading
/// All methods are synchronous. Backends must be `Send + Sync` so a single
/// store can be shared by the queue, the cache and the engine.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> StorageResult<()>;
    /// Drop every slot.
    fn clear(&self) -> StorageResult<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        (**self).remove(key)
    }

    fn clear(&self) -> StorageResult<()> {
        (**self).clear()
    }
}
