//! Background dispatch worker with a depth-1 slot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sparkscale_types::{Epoch, ScalingDecision};

use crate::dispatcher::{Ack, ScaleRequestDispatcher};

/// Lifetime dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    accepted: AtomicU64,
    failed: AtomicU64,
    superseded: AtomicU64,
}

impl DispatchStats {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Decisions replaced in the slot before they were sent.
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }

    /// Decisions that reached a final outcome.
    pub fn completed(&self) -> u64 {
        self.accepted() + self.failed()
    }
}

struct Slot {
    pending: Mutex<Option<ScalingDecision>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Slot {
    fn take(&self) -> Option<ScalingDecision> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn replace(&self, decision: ScalingDecision) -> Option<ScalingDecision> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(decision)
    }
}

/// Hands decisions to a single background worker without blocking.
///
/// The worker sends one decision at a time. A decision submitted while
/// another is being sent waits in the slot; a later submission replaces
/// it, so only the newest waiting decision is ever sent.
pub struct DispatchQueue {
    slot: Arc<Slot>,
    dispatcher: Arc<ScaleRequestDispatcher>,
    stats: Arc<DispatchStats>,
    handle: JoinHandle<()>,
}

impl DispatchQueue {
    /// Start the worker task.
    pub fn spawn(dispatcher: Arc<ScaleRequestDispatcher>) -> Self {
        let slot = Arc::new(Slot {
            pending: Mutex::new(None),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let stats = Arc::new(DispatchStats::default());

        let handle = tokio::spawn(worker(Arc::clone(&slot), Arc::clone(&dispatcher), Arc::clone(&stats)));

        Self {
            slot,
            dispatcher,
            stats,
            handle,
        }
    }

    /// Queue a decision. Returns the epoch it superseded, if any.
    ///
    /// No-op decisions are ignored.
    pub fn submit(&self, decision: ScalingDecision) -> Option<Epoch> {
        if decision.is_noop() {
            return None;
        }
        if self.slot.closed.load(Ordering::SeqCst) {
            warn!(epoch = decision.epoch, "dispatch queue closed, dropping decision");
            return None;
        }

        let epoch = decision.epoch;
        let superseded = self.slot.replace(decision).map(|old| old.epoch);
        if let Some(old) = superseded {
            self.stats.superseded.fetch_add(1, Ordering::Relaxed);
            warn!(epoch, superseded = old, "queued decision superseded before dispatch");
        } else {
            debug!(epoch, "decision queued for dispatch");
        }
        self.slot.notify.notify_one();
        superseded
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    pub fn dispatcher(&self) -> &Arc<ScaleRequestDispatcher> {
        &self.dispatcher
    }

    /// Epoch waiting in the slot, if any.
    pub fn queued_epoch(&self) -> Option<Epoch> {
        self.slot
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|d| d.epoch)
    }

    /// Stop the worker.
    ///
    /// A queued decision is dropped, the in-flight dispatch stops retrying
    /// after its current attempt, and the worker is aborted if it has not
    /// finished within `grace`.
    pub async fn shutdown(self, grace: Duration) {
        self.slot.closed.store(true, Ordering::SeqCst);
        if let Some(dropped) = self.slot.take() {
            warn!(epoch = dropped.epoch, "dropping queued decision on shutdown");
        }
        self.dispatcher.cancel();
        self.slot.notify.notify_one();

        let mut handle = self.handle;
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => info!("dispatch worker stopped"),
            Err(_) => {
                warn!(
                    grace = ?grace,
                    epoch = ?self.dispatcher.outstanding_epoch(),
                    "dispatch did not finish within grace period, abandoning"
                );
                handle.abort();
            }
        }
    }
}

async fn worker(slot: Arc<Slot>, dispatcher: Arc<ScaleRequestDispatcher>, stats: Arc<DispatchStats>) {
    loop {
        let Some(decision) = slot.take() else {
            if slot.closed.load(Ordering::SeqCst) {
                break;
            }
            slot.notify.notified().await;
            continue;
        };

        match dispatcher.dispatch(&decision).await {
            Ok(Ack::Accepted { .. }) => {
                stats.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Ack::NotDispatched { .. }) => {}
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                debug!(epoch = decision.epoch, error = %e, "dispatch finished with error");
            }
        }
    }
    debug!("dispatch worker exiting");
}
