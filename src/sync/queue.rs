//! PendingQueue — ordered, persisted list of operations awaiting replay.
//!
//! The whole queue is one JSON array under `sync_queue`; every mutation is a
//! read-modify-write of that array. An internal lock serializes those cycles
//! so an enqueue racing with the end-of-drain removal is never lost.
//!
//! Retry bookkeeping (attempt counts, dead letters) lives in sibling slots and
//! never mutates a queued `Operation`.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    clock::Clock,
    error::{Result, ShopSyncError},
    storage::{keys, LocalCache},
    types::{record_id, Record},
};

use super::types::{DeadLetter, Operation, RemoteError, SyncAction};

/// Fresh time-ordered operation id.
pub fn generate_operation_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

pub struct PendingQueue {
    cache: LocalCache,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
}

impl PendingQueue {
    pub fn new(cache: LocalCache, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            clock,
            lock: Mutex::new(()),
        }
    }

    // -----------------------------------------------------------------------
    // Queue
    // -----------------------------------------------------------------------

    /// Append a new operation and persist the queue.
    ///
    /// `update` and `delete` payloads must carry the target id. Storage
    /// failures propagate; nothing is appended in memory only.
    pub fn enqueue(
        &self,
        collection: &str,
        action: SyncAction,
        payload: Record,
    ) -> Result<Operation> {
        let op = self.build(collection, action, payload)?;

        let _guard = self.lock.lock();
        let mut queue = self.read_queue()?;
        queue.push(op.clone());
        self.cache.set_json(keys::SYNC_QUEUE, &queue)?;

        debug!(
            operation_id = %op.id,
            collection = %op.collection,
            action = %op.action,
            queue_length = queue.len(),
            "operation enqueued"
        );
        Ok(op)
    }

    /// Validate and stamp an operation without queueing it.
    pub(crate) fn build(
        &self,
        collection: &str,
        action: SyncAction,
        payload: Record,
    ) -> Result<Operation> {
        if collection.is_empty() {
            return Err(ShopSyncError::InvalidOperation(
                "collection name is empty".to_string(),
            ));
        }
        if action.requires_target() && record_id(&payload).is_none() {
            return Err(ShopSyncError::InvalidOperation(format!(
                "{action} on \"{collection}\" requires an id in the payload"
            )));
        }

        Ok(Operation {
            id: generate_operation_id(),
            collection: collection.to_string(),
            action,
            payload,
            enqueued_at: self.stamp(),
        })
    }

    /// Enqueue time at the millisecond precision `last_sync` is stored with,
    /// so a drain in the same millisecond never reports an earlier sync.
    fn stamp(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        now.duration_trunc(Duration::milliseconds(1)).unwrap_or(now)
    }

    /// All pending operations in enqueue order.
    pub fn list(&self) -> Result<Vec<Operation>> {
        let _guard = self.lock.lock();
        self.read_queue()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.list()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove one operation. Unknown ids are a no-op.
    pub fn remove(&self, id: &str) -> Result<()> {
        self.remove_many(&[id.to_string()]).map(|_| ())
    }

    /// Remove a batch of operations in one write; returns how many were found.
    pub fn remove_many(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();

        let _guard = self.lock.lock();
        let mut queue = self.read_queue()?;
        let before = queue.len();
        queue.retain(|op| !targets.contains(op.id.as_str()));
        let removed = before - queue.len();
        if removed == 0 {
            return Ok(0);
        }

        self.cache.set_json(keys::SYNC_QUEUE, &queue)?;
        self.forget_attempts(&targets)?;
        Ok(removed)
    }

    /// Drop every pending operation and its retry bookkeeping.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.cache.remove(keys::SYNC_QUEUE)?;
        self.cache.remove(keys::SYNC_ATTEMPTS)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Retry bookkeeping
    // -----------------------------------------------------------------------

    /// Count one more failed attempt; returns the new total.
    pub fn record_failure(&self, id: &str) -> Result<u32> {
        let _guard = self.lock.lock();
        let mut attempts = self.read_attempts()?;
        let count = attempts.entry(id.to_string()).or_insert(0);
        *count += 1;
        let count = *count;
        self.cache.set_json(keys::SYNC_ATTEMPTS, &attempts)?;
        Ok(count)
    }

    pub fn attempts(&self, id: &str) -> Result<u32> {
        let _guard = self.lock.lock();
        Ok(self.read_attempts()?.get(id).copied().unwrap_or(0))
    }

    // -----------------------------------------------------------------------
    // Dead letters
    // -----------------------------------------------------------------------

    /// Move an operation from the replay queue to the dead-letter list.
    pub fn dead_letter(&self, op: &Operation, error: &RemoteError, attempts: u32) -> Result<()> {
        let _guard = self.lock.lock();

        let mut dead = self.read_dead_letters()?;
        dead.push(DeadLetter {
            operation: op.clone(),
            error: error.message.clone(),
            kind: error.kind,
            attempts,
            failed_at: self.clock.now(),
        });
        self.cache.set_json(keys::SYNC_DEAD_LETTER, &dead)?;

        let mut queue = self.read_queue()?;
        queue.retain(|queued| queued.id != op.id);
        self.cache.set_json(keys::SYNC_QUEUE, &queue)?;
        self.forget_attempts(&HashSet::from([op.id.as_str()]))?;
        Ok(())
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        let _guard = self.lock.lock();
        self.read_dead_letters()
    }

    /// Put a dead-lettered operation back at the tail of the queue.
    ///
    /// It gets a fresh id so id order keeps matching queue order; collection,
    /// action, payload and the original `enqueued_at` are preserved.
    pub fn requeue_dead_letter(&self, id: &str) -> Result<Operation> {
        let _guard = self.lock.lock();

        let mut dead = self.read_dead_letters()?;
        let pos = dead
            .iter()
            .position(|d| d.operation.id == id)
            .ok_or_else(|| ShopSyncError::DeadLetterNotFound(id.to_string()))?;
        let letter = dead.remove(pos);

        let op = Operation {
            id: generate_operation_id(),
            ..letter.operation
        };
        let mut queue = self.read_queue()?;
        queue.push(op.clone());
        self.cache.set_json(keys::SYNC_QUEUE, &queue)?;
        self.cache.set_json(keys::SYNC_DEAD_LETTER, &dead)?;
        Ok(op)
    }

    pub fn clear_dead_letters(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.cache.remove(keys::SYNC_DEAD_LETTER)
    }

    // -----------------------------------------------------------------------
    // Internal helpers (caller holds `lock`)
    // -----------------------------------------------------------------------

    fn read_queue(&self) -> Result<Vec<Operation>> {
        Ok(self.cache.get_json(keys::SYNC_QUEUE)?.unwrap_or_default())
    }

    fn read_attempts(&self) -> Result<BTreeMap<String, u32>> {
        Ok(self.cache.get_json(keys::SYNC_ATTEMPTS)?.unwrap_or_default())
    }

    fn read_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self
            .cache
            .get_json(keys::SYNC_DEAD_LETTER)?
            .unwrap_or_default())
    }

    fn forget_attempts(&self, ids: &HashSet<&str>) -> Result<()> {
        let mut attempts = self.read_attempts()?;
        let before = attempts.len();
        attempts.retain(|id, _| !ids.contains(id.as_str()));
        if attempts.len() != before {
            self.cache.set_json(keys::SYNC_ATTEMPTS, &attempts)?;
        }
        Ok(())
    }
}
