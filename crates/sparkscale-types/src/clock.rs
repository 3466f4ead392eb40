//! Time sources and epoch allocation.
//!
//! Cooldown checks and retry backoff both go through a `Clock` so tests
//! can drive time explicitly with `ManualClock` instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::types::{Epoch, TimestampMs};

/// Injectable time source.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> TimestampMs;

    /// Wait for `duration` to pass on this clock.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by `SystemTime` and `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_ms(&self) -> TimestampMs {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A clock that only moves when told to.
///
/// `sleep` advances the clock by the requested duration and returns
/// immediately, recording the duration so tests can assert on backoff.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl ManualClock {
    /// Create a manual clock starting at `start_ms`.
    pub fn new(start_ms: TimestampMs) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, now_ms: TimestampMs) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Every duration passed to `sleep` so far, in call order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> TimestampMs {
        self.now.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Allocates strictly increasing decision epochs, starting at 1.
///
/// Every cycle takes an epoch, including cycles that end in `NoOp`, so an
/// epoch is never handed out twice for the lifetime of the counter.
#[derive(Debug, Default)]
pub struct EpochCounter {
    last: Epoch,
}

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next epoch.
    pub fn advance(&mut self) -> Epoch {
        self.last += 1;
        self.last
    }

    /// The most recently allocated epoch (0 before the first call).
    pub fn last(&self) -> Epoch {
        self.last
    }
}
