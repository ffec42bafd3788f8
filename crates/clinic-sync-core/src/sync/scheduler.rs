//! SyncScheduler: decides when the reconciler runs.
//!
//! Triggers are the fixed-interval timer (only while online), the transition
//! from offline to online, and explicit [`SyncScheduler::force_sync`] calls.
//! At most one reconciliation is in flight; triggers that arrive meanwhile
//! are dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::connectivity::ConnectivityProbe;
use super::engine::{SyncEngine, SyncReport};
use super::error::{SyncError, SyncResult};

/// Anything that can run a full reconciliation cycle.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile_all(&self) -> SyncResult<SyncReport>;
}

#[async_trait]
impl Reconciler for SyncEngine {
    async fn reconcile_all(&self) -> SyncResult<SyncReport> {
        SyncEngine::reconcile_all(self).await
    }
}

/// What happened to a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    /// Dropped because a reconciliation is already running.
    AlreadySyncing,
}

struct Shared {
    reconciler: Arc<dyn Reconciler>,
    connectivity: Arc<dyn ConnectivityProbe>,
    syncing: AtomicBool,
    status_tx: broadcast::Sender<bool>,
}

/// Holds the single-flight slot; releasing it publishes `false`.
struct Flight {
    shared: Arc<Shared>,
}

impl Shared {
    fn try_begin(self: &Arc<Self>) -> Option<Flight> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let _ = self.status_tx.send(true);
        Some(Flight {
            shared: self.clone(),
        })
    }

    /// Spawn a reconciliation unless one is running.
    fn trigger(self: &Arc<Self>, reason: &'static str) -> TriggerOutcome {
        match self.try_begin() {
            Some(flight) => {
                debug!(reason, "sync triggered");
                tokio::spawn(async move {
                    let _ = flight.run().await;
                });
                TriggerOutcome::Started
            }
            None => {
                debug!(reason, "sync already in flight, trigger dropped");
                TriggerOutcome::AlreadySyncing
            }
        }
    }
}

impl Flight {
    async fn run(self) -> SyncResult<SyncReport> {
        let result = self.shared.reconciler.reconcile_all().await;
        match &result {
            Ok(report) => info!(
                pushed = report.total_pushed(),
                pulled = report.total_pulled(),
                "sync finished"
            ),
            Err(e) => warn!(error = %e, "sync failed"),
        }
        result
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        // Publish before releasing so a racing trigger's `true` comes after
        let _ = self.shared.status_tx.send(false);
        self.shared.syncing.store(false, Ordering::Release);
    }
}

pub struct SyncScheduler {
    shared: Arc<Shared>,
    period: Duration,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(
        reconciler: Arc<dyn Reconciler>,
        connectivity: Arc<dyn ConnectivityProbe>,
        period: Duration,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                reconciler,
                connectivity,
                syncing: AtomicBool::new(false),
                status_tx,
            }),
            period,
            shutdown_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Start the timer and connectivity subscription. Must be called from
    /// within a tokio runtime. A second call while running is a no-op.
    pub fn start(&self) {
        let Ok(mut handle) = self.handle.lock() else {
            return;
        };
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let (tx, rx) = oneshot::channel();
        if let Ok(mut shutdown_tx) = self.shutdown_tx.lock() {
            *shutdown_tx = Some(tx);
        }

        // Subscribe before returning so no transition after start() is missed
        let mut online_rx = self.shared.connectivity.subscribe();
        let was_online = *online_rx.borrow_and_update();

        info!(period_secs = self.period.as_secs(), "sync scheduler started");
        *handle = Some(tokio::spawn(run_loop(
            self.shared.clone(),
            self.period,
            online_rx,
            was_online,
            rx,
        )));
    }

    /// Release the timer and connectivity subscription. An in-flight
    /// reconciliation runs to completion.
    pub fn shutdown(&self) {
        let tx = self.shutdown_tx.lock().ok().and_then(|mut tx| tx.take());
        let handle = self.handle.lock().ok().and_then(|mut handle| handle.take());
        if let Some(tx) = tx {
            let _ = tx.send(());
        }
        // Clearing the handle lets a later start() spawn a fresh loop
        if let Some(handle) = handle {
            handle.abort();
            info!("sync scheduler stopped");
        }
    }

    /// Run a reconciliation now and wait for it.
    ///
    /// Fails with [`SyncError::Offline`] without attempting anything when
    /// offline. Returns `Ok(None)` when a reconciliation is already running.
    pub async fn force_sync(&self) -> SyncResult<Option<SyncReport>> {
        if !self.shared.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        match self.shared.try_begin() {
            Some(flight) => flight.run().await.map(Some),
            None => {
                debug!("force sync dropped, already syncing");
                Ok(None)
            }
        }
    }

    /// Fire-and-forget trigger with the same rules as the timer.
    pub fn request_sync(&self) -> TriggerOutcome {
        self.shared.trigger("requested")
    }

    pub fn is_syncing(&self) -> bool {
        self.shared.syncing.load(Ordering::Acquire)
    }

    /// Every Idle/Syncing transition, as `true` on start and `false` on finish.
    pub fn subscribe_status(&self) -> broadcast::Receiver<bool> {
        self.shared.status_tx.subscribe()
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_loop(
    shared: Arc<Shared>,
    period: Duration,
    mut online_rx: watch::Receiver<bool>,
    mut was_online: bool,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut watching = true;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                if shared.connectivity.is_online() {
                    shared.trigger("timer");
                } else {
                    debug!("timer fired while offline");
                }
            }
            changed = online_rx.changed(), if watching => {
                if changed.is_err() {
                    warn!("connectivity source closed");
                    watching = false;
                    continue;
                }
                let online = *online_rx.borrow_and_update();
                if online && !was_online {
                    info!("connectivity restored");
                    shared.trigger("connectivity");
                }
                was_online = online;
            }
        }
    }
}
