//! Sync-specific types: the remote service trait, queued operations, drain
//! results and engine options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    connectivity::ConnectivitySignal,
    query::QueryFilter,
    storage::KeyValueStore,
    types::{record_id, Record},
};

use super::retry::RetryPolicy;

// ============================================================================
// RemoteDataService — hosted backend
// ============================================================================

/// The hosted relational backend, seen as named collections of records.
///
/// Implementations own transport, auth and the backend's own consistency.
/// The engine never inspects error content beyond `RemoteError::kind`.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// Create a record; returns the stored row (with its server-assigned id).
    async fn insert(&self, collection: &str, record: Record) -> Result<Record, RemoteError>;

    /// Apply `patch` to the record identified by `id`.
    async fn update(&self, collection: &str, id: &str, patch: Record)
        -> Result<Record, RemoteError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    /// Bulk read used by the cache-refresh path.
    async fn query(&self, collection: &str, filter: &QueryFilter)
        -> Result<Vec<Record>, RemoteError>;
}

/// Classification of remote failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteErrorKind {
    /// Network unreachable, timeouts, 5xx-equivalents.
    Transient,
    /// Will fail the same way on replay (constraint violations, duplicates).
    Permanent,
}

/// Error returned by a `RemoteDataService` call.
#[derive(Debug, Clone)]
pub struct RemoteError {
    pub message: String,
    pub kind: RemoteErrorKind,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: RemoteErrorKind::Transient,
        }
    }

    pub fn with_kind(message: impl Into<String>, kind: RemoteErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::with_kind(message, RemoteErrorKind::Permanent)
    }

    pub(crate) fn timeout(after: Duration) -> Self {
        Self::new(format!("remote call timed out after {}ms", after.as_millis()))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RemoteError {}

// ============================================================================
// Operation — one queued mutation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Insert,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Whether the payload must name its target record.
    pub fn requires_target(&self) -> bool {
        matches!(self, Self::Update | Self::Delete)
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation waiting to be applied remotely. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// UUIDv7: lexical order equals enqueue order.
    pub id: String,
    pub collection: String,
    pub action: SyncAction,
    pub payload: Record,
    /// Millisecond precision, matching the stored `last_sync`.
    pub enqueued_at: DateTime<Utc>,
}

impl Operation {
    /// Identifier of the record this operation touches, if the payload names one.
    pub fn target_id(&self) -> Option<String> {
        record_id(&self.payload)
    }

    /// `(collection, record id)` used to keep dependent operations in order.
    pub fn record_key(&self) -> Option<(String, String)> {
        self.target_id().map(|id| (self.collection.clone(), id))
    }
}

/// An operation pulled out of the replay queue after a terminal failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub operation: Operation,
    pub error: String,
    pub kind: RemoteErrorKind,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

// ============================================================================
// Status
// ============================================================================

/// Tag passed to status listeners at the start and end of each drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatusTag {
    Syncing,
    Idle,
    Synced,
    Error,
}

/// Point-in-time view of the engine. Built from local state only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub queue_length: usize,
    pub is_syncing: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub dead_letter_count: usize,
}

pub type StatusListener = Arc<dyn Fn(SyncStatusTag) + Send + Sync>;

/// Deregisters a listener when called.
pub type Unsubscribe = Box<dyn FnOnce() + Send>;

// ============================================================================
// Drain results
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FailedOperation {
    pub id: String,
    pub error: String,
    pub kind: RemoteErrorKind,
}

/// Per-item results of one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Applied remotely and removed from the queue, in replay order.
    pub processed: Vec<String>,
    /// Dispatched and rejected.
    pub failed: Vec<FailedOperation>,
    /// Not dispatched because an earlier operation on the same record failed.
    pub deferred: Vec<String>,
    /// Subset of `failed` moved to the dead-letter list.
    pub dead_lettered: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// Another drain was in flight; this request was dropped.
    AlreadySyncing,
    /// The connectivity signal reported offline.
    Offline,
    /// The queue was empty.
    Empty,
    Completed(DrainReport),
    /// The pass failed outside the per-item loop; the queue is untouched.
    Aborted { error: String },
}

impl DrainOutcome {
    /// Final tag reported to listeners, `None` when no drain started.
    pub fn status(&self) -> Option<SyncStatusTag> {
        match self {
            Self::AlreadySyncing | Self::Offline => None,
            Self::Empty => Some(SyncStatusTag::Idle),
            Self::Completed(report) if report.processed.is_empty() => Some(SyncStatusTag::Idle),
            Self::Completed(_) => Some(SyncStatusTag::Synced),
            Self::Aborted { .. } => Some(SyncStatusTag::Error),
        }
    }

    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Per-operation failure, reported through `SyncEngineOptions::on_error`.
#[derive(Debug, Clone)]
pub struct SyncErrorEvent {
    pub operation_id: String,
    pub collection: String,
    pub action: SyncAction,
    pub error: String,
    pub kind: RemoteErrorKind,
    pub attempts: u32,
}

pub type SyncErrorCallback = Arc<dyn Fn(&SyncErrorEvent) + Send + Sync>;

// ============================================================================
// Write path and reads
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Applied directly; carries the stored row for inserts and updates.
    Applied(Option<Record>),
    /// Queued for a later drain.
    Queued(Operation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Remote,
    Cache,
}

/// Result of a read that may fall back to the cached snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub records: Vec<Record>,
    pub source: SnapshotSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Offline,
    /// No cached profile, so no shop to scope the fetch to.
    NoProfile,
    Refreshed { products: usize, sales: usize },
    /// A remote read failed; no snapshot was touched.
    Failed { error: String },
}

// ============================================================================
// SyncEngine Options
// ============================================================================

/// Configuration for `SyncEngine`.
pub struct SyncEngineOptions {
    pub store: Arc<dyn KeyValueStore>,
    pub remote: Arc<dyn RemoteDataService>,
    pub connectivity: Arc<dyn ConnectivitySignal>,
    /// Time source (default: `SystemClock`)
    pub clock: Option<Arc<dyn Clock>>,
    /// Retry / dead-letter policy (default: retry forever)
    pub retry: Option<RetryPolicy>,
    /// Per remote call timeout (default: 20s)
    pub remote_timeout: Option<Duration>,
    /// Sales kept by `refresh_from_server` (default: 100)
    pub recent_sales_limit: Option<usize>,
    /// Called for each failed operation
    pub on_error: Option<SyncErrorCallback>,
}

impl SyncEngineOptions {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteDataService>,
        connectivity: Arc<dyn ConnectivitySignal>,
    ) -> Self {
        Self {
            store,
            remote,
            connectivity,
            clock: None,
            retry: None,
            remote_timeout: None,
            recent_sales_limit: None,
            on_error: None,
        }
    }
}
