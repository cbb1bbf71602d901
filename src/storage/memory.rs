//! MemoryStore — a `KeyValueStore` that keeps every slot in a HashMap.
//!
//! Nothing survives the process. Used for tests and for hosts that provide
//! durability some other way (e.g. by seeding and dumping the map).

use std::collections::HashMap;

use parking_lot::Mutex;

use super::traits::{KeyValueStore, StorageResult};

/// In-memory key-value store.
///
/// Interior mutability via `parking_lot::Mutex`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with the given slots.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let slots = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Copy of every slot, for persisting elsewhere.
    pub fn entries(&self) -> HashMap<String, String> {
        self.slots.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.slots.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.slots.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.slots.lock().remove(key);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.slots.lock().clear();
        Ok(())
    }
}
