//! Offline write queue and sync engine for a point-of-sale client.
//!
//! Cashiers keep selling while disconnected: writes that cannot reach the
//! hosted backend are queued in a local durable cache and replayed in order
//! once connectivity returns.

pub mod clock;
pub mod connectivity;
pub mod error;
pub mod query;
pub mod storage;
pub mod sync;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connectivity::{ConnectivitySignal, ManualConnectivity};
pub use error::{Result, ShopSyncError, StorageError};
pub use query::QueryFilter;
pub use storage::{KeyValueStore, LocalCache, MemoryStore};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStore;
pub use sync::{
    DrainOutcome, Operation, RemoteDataService, RemoteError, RemoteErrorKind, SyncAction,
    SyncEngine, SyncEngineOptions, SyncScheduler, SyncSchedulerOptions, SyncStatus,
    SyncStatusTag,
};
pub use types::Record;
