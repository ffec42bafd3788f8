//! Network reachability.

use tokio::sync::watch;
use tracing::info;

/// Reports reachability and lets the scheduler watch for transitions.
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;

    /// A receiver that observes every change of the online flag.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Connectivity state fed by the host's platform network callback.
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    /// Record the platform's current reachability. Repeats are ignored.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }
}

impl ConnectivityProbe for ConnectivityMonitor {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}
