//! SyncEngine — drains the pending queue against the remote service.
//!
//! One engine owns one queue. At most one drain runs at a time; the
//! `is_syncing` flag is taken with a compare-and-swap and released by a guard
//! on every exit path. Operations are dispatched one after another in enqueue
//! order, never concurrently.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    clock::{Clock, SystemClock},
    connectivity::ConnectivitySignal,
    error::Result,
    query::QueryFilter,
    storage::{keys, LocalCache},
    types::{record_id, Record, ID_FIELD},
};

use super::{
    id_map::{is_placeholder, rewrite_placeholders, IdMap},
    queue::PendingQueue,
    retry::RetryPolicy,
    types::{
        DeadLetter, DrainOutcome, DrainReport, FailedOperation, Operation, RefreshOutcome,
        RemoteDataService, RemoteError, Snapshot, SnapshotSource, StatusListener,
        SyncAction, SyncEngineOptions, SyncErrorCallback, SyncErrorEvent, SyncStatus,
        SyncStatusTag, Unsubscribe, WriteOutcome,
    },
};

const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_RECENT_SALES_LIMIT: usize = 100;

type ListenerList = Mutex<Vec<(u64, StatusListener)>>;

// ============================================================================
// SyncingGuard — scoped ownership of the drain flag
// ============================================================================

struct SyncingGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SyncingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

pub struct SyncEngine {
    cache: LocalCache,
    queue: PendingQueue,
    id_map: IdMap,
    remote: Arc<dyn RemoteDataService>,
    connectivity: Arc<dyn ConnectivitySignal>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    remote_timeout: Duration,
    recent_sales_limit: usize,
    on_error: Option<SyncErrorCallback>,
    is_syncing: AtomicBool,
    consecutive_failed_drains: AtomicU32,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
}

impl SyncEngine {
    pub fn new(options: SyncEngineOptions) -> Self {
        let clock = options
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let cache = LocalCache::new(options.store);

        Self {
            queue: PendingQueue::new(cache.clone(), clock.clone()),
            id_map: IdMap::new(cache.clone()),
            cache,
            remote: options.remote,
            connectivity: options.connectivity,
            clock,
            retry: options.retry.unwrap_or_default(),
            remote_timeout: options.remote_timeout.unwrap_or(DEFAULT_REMOTE_TIMEOUT),
            recent_sales_limit: options
                .recent_sales_limit
                .unwrap_or(DEFAULT_RECENT_SALES_LIMIT),
            on_error: options.on_error,
            is_syncing: AtomicBool::new(false),
            consecutive_failed_drains: AtomicU32::new(0),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn connectivity(&self) -> &Arc<dyn ConnectivitySignal> {
        &self.connectivity
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Enqueue API
    // -----------------------------------------------------------------------

    /// Queue a mutation. When online, a drain is kicked off in the background
    /// on the current tokio runtime; it may finish after this returns.
    pub fn queue_sync(
        self: &Arc<Self>,
        collection: &str,
        action: SyncAction,
        payload: Record,
    ) -> Result<Operation> {
        let op = self.queue.enqueue(collection, action, payload)?;
        if self.connectivity.is_online() {
            self.spawn_drain();
        }
        Ok(op)
    }

    /// The UI write path: apply directly when online and nothing is waiting
    /// in the queue, otherwise (or when the direct call fails) enqueue.
    ///
    /// A non-empty queue always wins so a direct write never overtakes an
    /// earlier queued mutation of the same record.
    pub async fn write(
        self: &Arc<Self>,
        collection: &str,
        action: SyncAction,
        payload: Record,
    ) -> Result<WriteOutcome> {
        if self.connectivity.is_online() && self.queue.is_empty()? {
            let op = self.queue.build(collection, action, payload.clone())?;
            let mut ids = self.id_map.load()?;
            match self.dispatch(&op, &mut ids).await {
                Ok(stored) => {
                    debug!(collection, action = %action, "direct write applied");
                    return Ok(WriteOutcome::Applied(stored));
                }
                Err(err) => {
                    warn!(
                        collection,
                        action = %action,
                        error = %err,
                        "direct write failed; queueing for sync"
                    );
                }
            }
            // The failed direct call tells us a drain right now would fail too.
            let op = self.queue.enqueue(collection, action, payload)?;
            return Ok(WriteOutcome::Queued(op));
        }

        let op = self.queue_sync(collection, action, payload)?;
        Ok(WriteOutcome::Queued(op))
    }

    fn spawn_drain(self: &Arc<Self>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let engine = Arc::clone(self);
                handle.spawn(async move {
                    engine.process_queue().await;
                });
            }
            Err(_) => debug!("no async runtime; queued operation waits for the next drain"),
        }
    }

    // -----------------------------------------------------------------------
    // Drain
    // -----------------------------------------------------------------------

    /// User-initiated drain. Dropped if a drain is already running.
    pub async fn manual_sync(&self) -> DrainOutcome {
        self.process_queue().await
    }

    /// Run one drain pass over the queue.
    pub async fn process_queue(&self) -> DrainOutcome {
        if self.is_syncing() {
            return DrainOutcome::AlreadySyncing;
        }
        if !self.connectivity.is_online() {
            debug!("offline; drain skipped");
            return DrainOutcome::Offline;
        }
        let Some(guard) = SyncingGuard::acquire(&self.is_syncing) else {
            return DrainOutcome::AlreadySyncing;
        };

        self.notify(SyncStatusTag::Syncing);

        let outcome = match self.drain_pass().await {
            Ok(None) => DrainOutcome::Empty,
            Ok(Some(report)) => DrainOutcome::Completed(report),
            Err(err) => {
                error!(error = %err, "sync queue processing failed");
                DrainOutcome::Aborted {
                    error: err.to_string(),
                }
            }
        };
        self.track_failures(&outcome);

        drop(guard);
        if let Some(tag) = outcome.status() {
            self.notify(tag);
        }
        outcome
    }

    async fn drain_pass(&self) -> Result<Option<DrainReport>> {
        let pending = self.queue.list()?;
        if pending.is_empty() {
            return Ok(None);
        }

        let mut ids = self.id_map.load()?;
        let mut report = DrainReport::default();
        let mut blocked: HashSet<(String, String)> = HashSet::new();

        for op in &pending {
            let key = op.record_key();
            if key.as_ref().is_some_and(|k| blocked.contains(k)) {
                debug!(operation_id = %op.id, "earlier operation on this record failed; deferred");
                report.deferred.push(op.id.clone());
                continue;
            }

            debug!(
                operation_id = %op.id,
                collection = %op.collection,
                action = %op.action,
                "dispatching queued operation"
            );
            match self.dispatch(op, &mut ids).await {
                Ok(_) => report.processed.push(op.id.clone()),
                Err(err) => {
                    if let Some(key) = key {
                        blocked.insert(key);
                    }
                    if self.handle_failure(op, &err) {
                        report.dead_lettered.push(op.id.clone());
                    }
                    report.failed.push(FailedOperation {
                        id: op.id.clone(),
                        error: err.message,
                        kind: err.kind,
                    });
                }
            }
        }

        self.queue.remove_many(&report.processed)?;
        if !report.processed.is_empty() {
            self.cache.set_last_sync(self.clock.now())?;
        }

        info!(
            processed = report.processed.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            dead_lettered = report.dead_lettered.len(),
            "sync queue drained"
        );
        Ok(Some(report))
    }

    /// Count the attempt, report it and dead-letter if the policy says so.
    /// Bookkeeping failures are logged; they never abort the pass.
    fn handle_failure(&self, op: &Operation, err: &RemoteError) -> bool {
        warn!(
            operation_id = %op.id,
            collection = %op.collection,
            action = %op.action,
            kind = ?err.kind,
            error = %err,
            "sync error"
        );

        let attempts = match self.queue.record_failure(&op.id) {
            Ok(n) => n,
            Err(e) => {
                warn!(operation_id = %op.id, error = %e, "could not record failed attempt");
                0
            }
        };

        if let Some(on_error) = &self.on_error {
            let event = SyncErrorEvent {
                operation_id: op.id.clone(),
                collection: op.collection.clone(),
                action: op.action,
                error: err.message.clone(),
                kind: err.kind,
                attempts,
            };
            if catch_unwind(AssertUnwindSafe(|| on_error(&event))).is_err() {
                warn!(operation_id = %op.id, "sync error callback panicked");
            }
        }

        if !self.retry.should_dead_letter(&err.kind, attempts) {
            return false;
        }
        match self.queue.dead_letter(op, err, attempts) {
            Ok(()) => {
                warn!(operation_id = %op.id, attempts, "operation dead-lettered");
                true
            }
            Err(e) => {
                warn!(operation_id = %op.id, error = %e, "could not dead-letter operation");
                false
            }
        }
    }

    fn track_failures(&self, outcome: &DrainOutcome) {
        let failed_pass = match outcome {
            DrainOutcome::Aborted { .. } => true,
            DrainOutcome::Completed(r) => r.processed.is_empty() && !r.failed.is_empty(),
            DrainOutcome::Empty => false,
            DrainOutcome::AlreadySyncing | DrainOutcome::Offline => return,
        };
        if failed_pass {
            self.consecutive_failed_drains.fetch_add(1, Ordering::AcqRel);
        } else {
            self.consecutive_failed_drains.store(0, Ordering::Release);
        }
    }

    pub fn consecutive_failed_drains(&self) -> u32 {
        self.consecutive_failed_drains.load(Ordering::Acquire)
    }

    /// Delay before the next scheduled drain. Backoff takes over from the
    /// regular interval once it grows past it.
    pub fn next_drain_delay(&self, interval: Duration) -> Duration {
        match &self.retry.backoff {
            Some(backoff) => interval.max(backoff.delay_for(self.consecutive_failed_drains())),
            None => interval,
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Apply one operation remotely, resolving placeholder ids first.
    async fn dispatch(
        &self,
        op: &Operation,
        ids: &mut BTreeMap<String, String>,
    ) -> std::result::Result<Option<Record>, RemoteError> {
        let mut payload = op.payload.clone();

        match op.action {
            SyncAction::Insert => {
                let placeholder = op.target_id().filter(|id| is_placeholder(id));
                rewrite_placeholders(&mut payload, ids, Some(ID_FIELD));
                if placeholder.is_some() {
                    payload.remove(ID_FIELD);
                }

                let created = self
                    .with_timeout(self.remote.insert(&op.collection, payload))
                    .await?;

                if let Some(placeholder) = placeholder {
                    self.remember_server_id(&placeholder, &created, ids);
                }
                Ok(Some(created))
            }
            SyncAction::Update | SyncAction::Delete => {
                rewrite_placeholders(&mut payload, ids, None);
                let target = record_id(&payload).ok_or_else(|| {
                    RemoteError::permanent(format!("{} without a target id", op.action))
                })?;
                if is_placeholder(&target) {
                    return Err(RemoteError::new(format!(
                        "placeholder id {target} has not been reconciled yet"
                    )));
                }

                if op.action == SyncAction::Update {
                    payload.remove(ID_FIELD);
                    let updated = self
                        .with_timeout(self.remote.update(&op.collection, &target, payload))
                        .await?;
                    Ok(Some(updated))
                } else {
                    self.with_timeout(self.remote.delete(&op.collection, &target))
                        .await?;
                    Ok(None)
                }
            }
        }
    }

    fn remember_server_id(
        &self,
        placeholder: &str,
        created: &Record,
        ids: &mut BTreeMap<String, String>,
    ) {
        let Some(server_id) = record_id(created) else {
            warn!(placeholder, "insert returned no id; placeholder stays unresolved");
            return;
        };
        ids.insert(placeholder.to_string(), server_id.clone());
        if let Err(e) = self.id_map.insert(placeholder, &server_id) {
            warn!(placeholder, error = %e, "could not persist id mapping");
        }
    }

    async fn with_timeout<T, F>(&self, call: F) -> std::result::Result<T, RemoteError>
    where
        F: Future<Output = std::result::Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::timeout(self.remote_timeout)),
        }
    }

    // -----------------------------------------------------------------------
    // Status and listeners
    // -----------------------------------------------------------------------

    /// Snapshot of queue length, drain flag, last sync and connectivity.
    /// Reads local state only.
    pub fn get_status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            queue_length: self.queue.len()?,
            is_syncing: self.is_syncing(),
            last_sync_at: self.cache.last_sync()?,
            is_online: self.connectivity.is_online(),
            dead_letter_count: self.queue.dead_letters()?.len(),
        })
    }

    /// Register a listener for drain start/end tags. Call the returned
    /// closure to deregister it.
    pub fn on_status_change(&self, listener: StatusListener) -> Unsubscribe {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, listener));

        let listeners: Weak<ListenerList> = Arc::downgrade(&self.listeners);
        Box::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().retain(|(lid, _)| *lid != id);
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    fn notify(&self, tag: SyncStatusTag) {
        let snapshot: Vec<StatusListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(tag))).is_err() {
                warn!(?tag, "sync status listener panicked");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads and cache refresh
    // -----------------------------------------------------------------------

    /// Read a collection, preferring the remote service and falling back to
    /// the cached snapshot while offline or when the remote read fails.
    /// A successful remote read replaces the snapshot. Never enqueues.
    pub async fn load_collection(&self, collection: &str, filter: &QueryFilter) -> Result<Snapshot> {
        if self.connectivity.is_online() {
            match self
                .with_timeout(self.remote.query(collection, filter))
                .await
            {
                Ok(records) => {
                    if let Err(e) = self.cache.set_snapshot(collection, &records) {
                        warn!(collection, error = %e, "could not cache snapshot");
                    }
                    return Ok(Snapshot {
                        records,
                        source: SnapshotSource::Remote,
                    });
                }
                Err(err) => {
                    warn!(collection, error = %err, "remote read failed; serving cached snapshot");
                }
            }
        }

        let cached = self.cache.snapshot(collection)?;
        Ok(Snapshot {
            records: filter.apply(cached),
            source: SnapshotSource::Cache,
        })
    }

    /// Product list for the cashier's shop (falls back to the cache).
    pub async fn load_products(&self) -> Result<Snapshot> {
        let mut filter = QueryFilter::new().order_by("name", false);
        if let Some(shop_id) = self.shop_id()? {
            filter = filter.eq("shop_id", shop_id);
        }
        self.load_collection(keys::PRODUCTS, &filter).await
    }

    /// Mirror the shop's products and recent sales into the local cache.
    ///
    /// Both collections are fetched before either snapshot is written, so a
    /// failure leaves the cache exactly as it was.
    pub async fn refresh_from_server(&self) -> Result<RefreshOutcome> {
        if !self.connectivity.is_online() {
            return Ok(RefreshOutcome::Offline);
        }
        let Some(shop_id) = self.shop_id()? else {
            debug!("no cached profile; refresh skipped");
            return Ok(RefreshOutcome::NoProfile);
        };

        let products_filter = QueryFilter::new()
            .eq("shop_id", shop_id.clone())
            .order_by("name", false);
        let sales_filter = QueryFilter::new()
            .eq("shop_id", shop_id)
            .order_by("created_at", true)
            .limit(self.recent_sales_limit);

        let fetched = async {
            let products = self
                .with_timeout(self.remote.query(keys::PRODUCTS, &products_filter))
                .await?;
            let sales = self
                .with_timeout(self.remote.query(keys::SALES, &sales_filter))
                .await?;
            Ok::<_, RemoteError>((products, sales))
        }
        .await;

        let (products, sales) = match fetched {
            Ok(both) => both,
            Err(err) => {
                error!(error = %err, "error syncing from server");
                return Ok(RefreshOutcome::Failed {
                    error: err.message,
                });
            }
        };

        self.cache.set_products(&products)?;
        self.cache.set_sales(&sales)?;
        self.cache.set_last_sync(self.clock.now())?;

        info!(
            products = products.len(),
            sales = sales.len(),
            "local cache refreshed from server"
        );
        Ok(RefreshOutcome::Refreshed {
            products: products.len(),
            sales: sales.len(),
        })
    }

    fn shop_id(&self) -> Result<Option<serde_json::Value>> {
        Ok(self
            .cache
            .profile()?
            .and_then(|profile| profile.get("shop_id").cloned())
            .filter(|v| !v.is_null()))
    }

    // -----------------------------------------------------------------------
    // Dead letters and reset
    // -----------------------------------------------------------------------

    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.queue.dead_letters()
    }

    pub fn requeue_dead_letter(self: &Arc<Self>, id: &str) -> Result<Operation> {
        let op = self.queue.requeue_dead_letter(id)?;
        if self.connectivity.is_online() {
            self.spawn_drain();
        }
        Ok(op)
    }

    /// Wipe every local slot (logout / data reset).
    pub fn reset(&self) -> Result<()> {
        self.queue.clear()?;
        self.cache.clear()?;
        self.consecutive_failed_drains.store(0, Ordering::Release);
        Ok(())
    }
}
