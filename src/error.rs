use thiserror::Error;

use crate::sync::types::RemoteError;

/// Failures raised by a `KeyValueStore` backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage quota exceeded while writing key \"{key}\"")]
    QuotaExceeded { key: String },

    #[error("Corrupt value under key \"{key}\": {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum ShopSyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Dead-lettered operation not found: {0}")]
    DeadLetterNotFound(String),
}

pub type Result<T> = std::result::Result<T, ShopSyncError>;
