//! Shared data shapes.

use serde_json::{Map, Value};

/// A remote row: field name → JSON value.
pub type Record = Map<String, Value>;

/// Field that carries a record's identifier in payloads and remote rows.
pub const ID_FIELD: &str = "id";

/// Extract a record identifier as a string. Numeric ids are rendered in
/// decimal; any other JSON type is not an id.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get(ID_FIELD)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
