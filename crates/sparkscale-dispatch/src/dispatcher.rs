//! Scale request dispatcher.
//!
//! Converts a `ScalingDecision` into one orchestrator request and retries
//! transient failures. Two guards protect the write path:
//!
//! - an in-flight slot claimed with compare-and-set, so a second dispatch
//!   of the same epoch (or any other epoch) is refused while one is
//!   outstanding;
//! - a high-water mark of dispatched epochs, so an older decision is never
//!   sent after a newer one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use sparkscale_client::{ScaleAck, ScaleRequestSink, ScaleSparkClusterRequest};
use sparkscale_types::{Clock, Epoch, ScaleAction, ScalingDecision};

use crate::error::DispatchError;
use crate::retry::RetryPolicy;

/// Sentinel for "no dispatch outstanding". Epochs start at 1.
const NONE: Epoch = 0;

/// Result of a dispatch that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Ack {
    /// The orchestrator accepted the request.
    Accepted {
        epoch: Epoch,
        action: ScaleAction,
        attempts: u32,
        response: ScaleAck,
    },
    /// The decision was a no-op; nothing was sent.
    NotDispatched { epoch: Epoch },
}

impl Ack {
    pub fn epoch(&self) -> Epoch {
        match self {
            Ack::Accepted { epoch, .. } | Ack::NotDispatched { epoch } => *epoch,
        }
    }
}

/// Sends scale requests to a `ScaleRequestSink` with retries.
pub struct ScaleRequestDispatcher {
    sink: Arc<dyn ScaleRequestSink>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    /// Epoch currently being dispatched, or `NONE`.
    outstanding: AtomicU64,
    /// Highest epoch ever claimed.
    high_water: AtomicU64,
    cancel: watch::Sender<bool>,
}

/// Releases the in-flight slot when a dispatch ends, however it ends.
struct InFlight<'a> {
    slot: &'a AtomicU64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.slot.store(NONE, Ordering::SeqCst);
    }
}

impl ScaleRequestDispatcher {
    pub fn new(sink: Arc<dyn ScaleRequestSink>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            sink,
            retry,
            clock,
            outstanding: AtomicU64::new(NONE),
            high_water: AtomicU64::new(NONE),
            cancel,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Epoch of the dispatch currently in progress, if any.
    pub fn outstanding_epoch(&self) -> Option<Epoch> {
        match self.outstanding.load(Ordering::SeqCst) {
            NONE => None,
            epoch => Some(epoch),
        }
    }

    /// Stop retrying. An attempt already on the wire completes; no further
    /// attempt starts. Irreversible.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Dispatch one decision.
    ///
    /// `NoOp` returns `Ack::NotDispatched` without touching the network.
    pub async fn dispatch(&self, decision: &ScalingDecision) -> Result<Ack, DispatchError> {
        let epoch = decision.epoch;
        let Some(request) =
            ScaleSparkClusterRequest::for_action(decision.action, decision.observation.history.as_ref().ok())
        else {
            debug!(epoch, "no-op decision, nothing to dispatch");
            return Ok(Ack::NotDispatched { epoch });
        };

        let _guard = self.claim(epoch)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(epoch, attempt, action = %decision.action, "sending scale request");

            let failure = match self.sink.submit(&request).await {
                Ok(response) => {
                    info!(epoch, attempts = attempt, action = %decision.action, "scale request accepted");
                    return Ok(Ack::Accepted {
                        epoch,
                        action: decision.action,
                        attempts: attempt,
                        response,
                    });
                }
                Err(e) => DispatchError::from_attempt(epoch, e),
            };

            let last = match failure {
                DispatchError::Transient { source, .. } => source,
                permanent => {
                    error!(epoch, attempts = attempt, error = %permanent, "scale request rejected");
                    return Err(permanent);
                }
            };

            if !self.retry.allows_retry(attempt) {
                warn!(epoch, attempts = attempt, error = %last, "scale request retries exhausted");
                return Err(DispatchError::Exhausted {
                    epoch,
                    attempts: attempt,
                    last,
                });
            }

            let delay = self.retry.backoff(attempt);
            warn!(epoch, attempt, error = %last, retry_in = ?delay, "scale request failed, retrying");

            let mut cancelled = self.cancel.subscribe();
            tokio::select! {
                _ = self.clock.sleep(delay) => {}
                _ = cancelled.wait_for(|c| *c) => {}
            }
            if self.is_cancelled() {
                warn!(epoch, attempts = attempt, "dispatch cancelled by shutdown");
                return Err(DispatchError::Cancelled {
                    epoch,
                    attempts: attempt,
                });
            }
        }
    }

    /// Claim the in-flight slot for `epoch` and advance the high-water mark.
    fn claim(&self, epoch: Epoch) -> Result<InFlight<'_>, DispatchError> {
        if let Err(current) = self
            .outstanding
            .compare_exchange(NONE, epoch, Ordering::SeqCst, Ordering::SeqCst)
        {
            return Err(if current == epoch {
                DispatchError::DuplicateEpoch(epoch)
            } else {
                DispatchError::Busy {
                    epoch,
                    outstanding: current,
                }
            });
        }
        let guard = InFlight {
            slot: &self.outstanding,
        };

        let last = self.high_water.fetch_max(epoch, Ordering::SeqCst);
        if epoch <= last {
            return Err(DispatchError::StaleEpoch { epoch, last });
        }
        Ok(guard)
    }
}
