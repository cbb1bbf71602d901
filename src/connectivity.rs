//! Online/offline signal.
//!
//! Hosts feed network-state events into a `ManualConnectivity`; the engine and
//! scheduler only ever see the `ConnectivitySignal` trait.

use tokio::sync::watch;

pub trait ConnectivitySignal: Send + Sync {
    fn is_online(&self) -> bool;

    /// Receiver that observes every transition. The current value is marked
    /// as seen, so `changed()` resolves on the next transition only.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity flag driven by explicit `set_online` calls.
#[derive(Debug)]
pub struct ManualConnectivity {
    tx: watch::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Record a network-state event. Repeating the current state is not a
    /// transition and wakes no subscriber.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }
}

impl ConnectivitySignal for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
