pub mod local_cache;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

pub use local_cache::{keys, snapshot_key, LocalCache};
pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
pub use traits::{KeyValueStore, StorageResult};
