pub mod engine;
pub mod id_map;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod types;

pub use engine::SyncEngine;
pub use id_map::{is_placeholder, placeholder_id, IdMap};
pub use queue::PendingQueue;
pub use retry::{Backoff, RetryPolicy};
pub use scheduler::{SyncScheduler, SyncSchedulerOptions};
pub use types::{
    DeadLetter, DrainOutcome, DrainReport, FailedOperation, Operation, RefreshOutcome,
    RemoteDataService, RemoteError, RemoteErrorKind, Snapshot, SnapshotSource, StatusListener,
    SyncAction, SyncEngineOptions, SyncErrorCallback, SyncErrorEvent, SyncStatus, SyncStatusTag,
    Unsubscribe, WriteOutcome,
};
