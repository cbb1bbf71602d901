//! Typed JSON surface over a `KeyValueStore`.
//!
//! Every named slot of the client lives here: cached collection snapshots,
//! the cart, the cashier profile and the last-sync marker. The pending
//! operation queue is also stored through this surface (see `sync::queue`).

use std::borrow::Cow;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::types::Record;

use super::traits::KeyValueStore;

/// Persisted slot names.
pub mod keys {
    pub const PRODUCTS: &str = "products";
    pub const SALES: &str = "sales";
    pub const CART: &str = "cart";
    pub const SYNC_QUEUE: &str = "sync_queue";
    pub const PROFILE: &str = "profile";
    pub const LAST_SYNC: &str = "last_sync";
    pub const SYNC_ATTEMPTS: &str = "sync_attempts";
    pub const SYNC_DEAD_LETTER: &str = "sync_dead_letter";
    pub const SYNC_ID_MAP: &str = "sync_id_map";

    /// Prefix for snapshots of collections other than products and sales.
    pub const SNAPSHOT_PREFIX: &str = "snapshot:";
}

/// Slot holding the snapshot of `collection`. Products and sales keep their
/// own slots; every other collection is namespaced away from control slots.
pub fn snapshot_key(collection: &str) -> Cow<'_, str> {
    match collection {
        keys::PRODUCTS | keys::SALES => Cow::Borrowed(collection),
        other => Cow::Owned(format!("{}{other}", keys::SNAPSHOT_PREFIX)),
    }
}

/// Cheap-to-clone handle to the local durable cache.
#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn KeyValueStore>,
}

impl LocalCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Generic JSON slots
    // -----------------------------------------------------------------------

    /// Read and decode a slot. A value that no longer decodes as `T` is
    /// reported as `StorageError::Corrupt` rather than treated as absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| {
                StorageError::Corrupt {
                    key: key.to_string(),
                    source,
                }
                .into()
            })
    }

    pub fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, &raw)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.store.remove(key)?;
        Ok(())
    }

    /// Drop every slot (logout / data reset).
    pub fn clear(&self) -> Result<()> {
        self.store.clear()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Collection snapshots
    // -----------------------------------------------------------------------

    /// Last-known-good mirror of a remote collection. Empty when never fetched.
    pub fn snapshot(&self, collection: &str) -> Result<Vec<Record>> {
        Ok(self.get_json(&snapshot_key(collection))?.unwrap_or_default())
    }

    /// Replace a snapshot wholesale. Snapshots are never merged.
    pub fn set_snapshot(&self, collection: &str, records: &[Record]) -> Result<()> {
        self.set_json(&snapshot_key(collection), records)
    }

    pub fn products(&self) -> Result<Vec<Record>> {
        self.snapshot(keys::PRODUCTS)
    }

    pub fn set_products(&self, products: &[Record]) -> Result<()> {
        self.set_snapshot(keys::PRODUCTS, products)
    }

    pub fn sales(&self) -> Result<Vec<Record>> {
        self.snapshot(keys::SALES)
    }

    pub fn set_sales(&self, sales: &[Record]) -> Result<()> {
        self.set_snapshot(keys::SALES, sales)
    }

    // -----------------------------------------------------------------------
    // Cart and profile
    // -----------------------------------------------------------------------

    pub fn cart(&self) -> Result<Vec<Value>> {
        Ok(self.get_json(keys::CART)?.unwrap_or_default())
    }

    pub fn set_cart(&self, items: &[Value]) -> Result<()> {
        self.set_json(keys::CART, items)
    }

    pub fn profile(&self) -> Result<Option<Record>> {
        self.get_json(keys::PROFILE)
    }

    pub fn set_profile(&self, profile: &Record) -> Result<()> {
        self.set_json(keys::PROFILE, profile)
    }

    // -----------------------------------------------------------------------
    // Last sync marker (unix milliseconds on disk)
    // -----------------------------------------------------------------------

    pub fn last_sync(&self) -> Result<Option<DateTime<Utc>>> {
        let millis: Option<i64> = self.get_json(keys::LAST_SYNC)?;
        Ok(millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    pub fn set_last_sync(&self, at: DateTime<Utc>) -> Result<()> {
        self.set_json(keys::LAST_SYNC, &at.timestamp_millis())
    }
}
