//! SyncScheduler — periodic and connectivity-driven drains.
//!
//! While online, the engine is drained every `interval` (stretched by the
//! retry backoff after failing passes). Going online drains immediately and
//! restarts the period; going offline suspends it until the next transition.
//!
//! Each drain is spawned as its own task, so `stop` never cuts a drain short.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::SyncEngine;

const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default)]
pub struct SyncSchedulerOptions {
    /// Period between drains while online (default: 30s)
    pub interval: Option<Duration>,
}

pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, options: SyncSchedulerOptions) -> Self {
        Self {
            engine,
            interval: options.interval.unwrap_or(DEFAULT_SYNC_INTERVAL),
            task: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Install the periodic drain and connectivity watch. Calling it while
    /// already running does nothing. Returns whether a new task was started.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("sync scheduler needs a tokio runtime; not started");
                return false;
            }
        };

        let engine = Arc::clone(&self.engine);
        let interval = self.interval;
        *task = Some(handle.spawn(run(engine, interval)));
        info!(interval_ms = interval.as_millis() as u64, "sync scheduler started");
        true
    }

    /// Remove the periodic drain and connectivity watch. A drain already in
    /// flight runs to completion. Returns whether a running task was stopped.
    pub fn stop(&self) -> bool {
        match self.task.lock().take() {
            Some(handle) => {
                handle.abort();
                info!("sync scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run(engine: Arc<SyncEngine>, interval: Duration) {
    let mut online_rx = engine.connectivity().subscribe();
    let mut online = *online_rx.borrow_and_update();

    if online {
        drain(&engine).await;
    }

    loop {
        if online {
            let delay = engine.next_drain_delay(interval);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    drain(&engine).await;
                }
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    online = *online_rx.borrow_and_update();
                    if online {
                        info!("back online; draining sync queue");
                        drain(&engine).await;
                    } else {
                        info!("offline; periodic sync suspended");
                    }
                }
            }
        } else {
            if online_rx.changed().await.is_err() {
                break;
            }
            online = *online_rx.borrow_and_update();
            if online {
                info!("back online; draining sync queue");
                drain(&engine).await;
            }
        }
    }

    debug!("connectivity signal closed; sync scheduler exiting");
}

/// Drain on a separate task and wait for it, so aborting the scheduler does
/// not cancel the drain.
async fn drain(engine: &Arc<SyncEngine>) {
    let engine = Arc::clone(engine);
    if let Err(e) = tokio::spawn(async move { engine.process_queue().await }).await {
        warn!(error = %e, "scheduled drain task failed");
    }
}
