//! Placeholder id reconciliation.
//!
//! Records created offline get a `temp_` id so later queued operations can
//! refer to them. When the insert finally lands, the server-assigned id is
//! recorded here and every later reference is rewritten before dispatch.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::{
    error::Result,
    storage::{keys, LocalCache},
    types::Record,
};

pub const PLACEHOLDER_PREFIX: &str = "temp_";

/// Fresh placeholder id for a record created while offline.
pub fn placeholder_id() -> String {
    format!("{PLACEHOLDER_PREFIX}{}", uuid::Uuid::now_v7().simple())
}

pub fn is_placeholder(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

/// Placeholder → server id, persisted under `sync_id_map`.
pub struct IdMap {
    cache: LocalCache,
}

impl IdMap {
    pub fn new(cache: LocalCache) -> Self {
        Self { cache }
    }

    pub fn load(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.cache.get_json(keys::SYNC_ID_MAP)?.unwrap_or_default())
    }

    pub fn resolve(&self, placeholder: &str) -> Result<Option<String>> {
        Ok(self.load()?.get(placeholder).cloned())
    }

    pub fn insert(&self, placeholder: &str, server_id: &str) -> Result<()> {
        let mut map = self.load()?;
        map.insert(placeholder.to_string(), server_id.to_string());
        self.cache.set_json(keys::SYNC_ID_MAP, &map)
    }
}

/// Rewrite top-level string values that are known placeholders. `skip` names
/// a field left untouched (an insert's own placeholder id).
pub fn rewrite_placeholders(
    payload: &mut Record,
    map: &BTreeMap<String, String>,
    skip: Option<&str>,
) {
    for (field, value) in payload.iter_mut() {
        if Some(field.as_str()) == skip {
            continue;
        }
        if let Value::String(s) = value {
            if let Some(server_id) = map.get(s.as_str()) {
                *s = server_id.clone();
            }
        }
    }
}
