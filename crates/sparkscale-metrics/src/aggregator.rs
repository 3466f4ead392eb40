//! Metrics aggregator — one concurrent, bounded collection per cycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use sparkscale_types::{
    CapacityObservation, Clock, ClusterObservation, HistoryObservation, LagObservation, SignalError,
    SignalKind, SignalOutcome, SignalSource,
};

/// Timeouts for signal collection.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Timeout for any signal without an override.
    pub default_timeout: Duration,
    /// Per-signal overrides.
    pub timeouts: BTreeMap<SignalKind, Duration>,
    /// Budget for the whole observation phase.
    pub observe_budget: Duration,
}

impl AggregatorConfig {
    /// Derive timeouts from the control interval: each signal gets a third
    /// of the interval, the phase gets the interval minus `margin`.
    pub fn for_interval(interval: Duration, margin: Duration) -> Self {
        Self {
            default_timeout: interval / 3,
            timeouts: BTreeMap::new(),
            observe_budget: interval.saturating_sub(margin),
        }
    }

    pub fn with_timeout(mut self, kind: SignalKind, timeout: Duration) -> Self {
        self.timeouts.insert(kind, timeout);
        self
    }

    /// Effective timeout for `kind`, never longer than the phase budget.
    pub fn timeout_for(&self, kind: SignalKind) -> Duration {
        self.timeouts
            .get(&kind)
            .copied()
            .unwrap_or(self.default_timeout)
            .min(self.observe_budget)
    }
}

/// Outcome counters for one signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalCounts {
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
}

#[derive(Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl Counters {
    fn load(&self) -> SignalCounts {
        SignalCounts {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Lifetime outcome counters for every signal plus insufficient cycles.
#[derive(Default)]
pub struct AggregatorStats {
    lag: Counters,
    capacity: Counters,
    history: Counters,
    insufficient: AtomicU64,
}

impl AggregatorStats {
    fn counters(&self, kind: SignalKind) -> &Counters {
        match kind {
            SignalKind::Lag => &self.lag,
            SignalKind::Capacity => &self.capacity,
            SignalKind::History => &self.history,
        }
    }

    fn record<T>(&self, kind: SignalKind, outcome: &SignalOutcome<T>) {
        let c = self.counters(kind);
        match outcome {
            Ok(_) => c.succeeded.fetch_add(1, Ordering::Relaxed),
            Err(SignalError::Timeout(_)) => c.timed_out.fetch_add(1, Ordering::Relaxed),
            Err(_) => c.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn signal(&self, kind: SignalKind) -> SignalCounts {
        self.counters(kind).load()
    }

    /// Observations that had fewer than two signals.
    pub fn insufficient(&self) -> u64 {
        self.insufficient.load(Ordering::Relaxed)
    }
}

/// Collects lag, capacity and history concurrently into one observation.
pub struct MetricsAggregator {
    lag: Arc<dyn SignalSource<Output = LagObservation>>,
    capacity: Arc<dyn SignalSource<Output = CapacityObservation>>,
    history: Arc<dyn SignalSource<Output = HistoryObservation>>,
    config: AggregatorConfig,
    clock: Arc<dyn Clock>,
    stats: Arc<AggregatorStats>,
}

impl MetricsAggregator {
    pub fn new(
        lag: Arc<dyn SignalSource<Output = LagObservation>>,
        capacity: Arc<dyn SignalSource<Output = CapacityObservation>>,
        history: Arc<dyn SignalSource<Output = HistoryObservation>>,
        config: AggregatorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            lag,
            capacity,
            history,
            config,
            clock,
            stats: Arc::new(AggregatorStats::default()),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<AggregatorStats> {
        Arc::clone(&self.stats)
    }

    /// Collect one observation. Never fails.
    pub async fn observe(&self) -> ClusterObservation {
        let observed_at = self.clock.now_ms();

        let (lag, capacity, history) = tokio::join!(
            fetch_bounded(Arc::clone(&self.lag), self.config.timeout_for(SignalKind::Lag)),
            fetch_bounded(Arc::clone(&self.capacity), self.config.timeout_for(SignalKind::Capacity)),
            fetch_bounded(Arc::clone(&self.history), self.config.timeout_for(SignalKind::History)),
        );

        self.report(SignalKind::Lag, &lag, |l| {
            format!("backlog={} partitions={}", l.total_backlog(), l.partition_count())
        });
        self.report(SignalKind::Capacity, &capacity, |c| {
            format!("workers={} headroom={:.3}", c.workers(), c.headroom_ratio())
        });
        self.report(SignalKind::History, &history, |h| format!("stages={}", h.len()));

        let observation = ClusterObservation {
            observed_at,
            lag: lag.0,
            capacity: capacity.0,
            history: history.0,
        };

        if !observation.is_sufficient() {
            self.stats.insufficient.fetch_add(1, Ordering::Relaxed);
            warn!(
                present = observation.present_count(),
                required = ClusterObservation::MIN_PRESENT,
                "insufficient observation, cycle will not scale"
            );
        }

        observation
    }

    /// Emit the per-signal event and count the outcome.
    fn report<T>(
        &self,
        kind: SignalKind,
        (outcome, elapsed): &(SignalOutcome<T>, Duration),
        summary: impl FnOnce(&T) -> String,
    ) {
        self.stats.record(kind, outcome);
        let elapsed_ms = elapsed.as_millis() as u64;
        match outcome {
            Ok(value) => {
                debug!(signal = %kind, elapsed_ms, detail = %summary(value), "signal collected");
            }
            Err(SignalError::Timeout(after)) => {
                warn!(signal = %kind, timeout = ?after, "signal timed out");
            }
            Err(e) => {
                warn!(signal = %kind, elapsed_ms, error = %e, "signal unavailable");
            }
        }
    }
}

/// Run one fetch on its own task, bounded by `timeout`.
async fn fetch_bounded<T: Send + 'static>(
    source: Arc<dyn SignalSource<Output = T>>,
    timeout: Duration,
) -> (SignalOutcome<T>, Duration) {
    let started = Instant::now();
    let kind = source.kind();

    let handle = tokio::spawn(async move { tokio::time::timeout(timeout, source.fetch()).await });

    let outcome = match handle.await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(SignalError::Timeout(timeout)),
        Err(e) => Err(SignalError::Unavailable(format!("{kind} fetch task failed: {e}"))),
    };

    (outcome, started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sparkscale_types::{ManualClock, StageRecord};

    /// How a fake source responds.
    #[derive(Clone)]
    enum Behavior<T> {
        Ok(T),
        Fail,
        Violation,
        Delay(Duration, T),
        Hang,
        Panic,
    }

    struct FakeSource<T> {
        kind: SignalKind,
        behavior: Behavior<T>,
    }

    #[async_trait]
    impl<T: Clone + Send + Sync + 'static> SignalSource for FakeSource<T> {
        type Output = T;

        fn kind(&self) -> SignalKind {
            self.kind
        }

        async fn fetch(&self) -> Result<T, SignalError> {
            match &self.behavior {
                Behavior::Ok(v) => Ok(v.clone()),
                Behavior::Fail => Err(SignalError::Unavailable("connection refused".into())),
                Behavior::Violation => Err(SignalError::PolicyViolation("negative offset".into())),
                Behavior::Delay(d, v) => {
                    tokio::time::sleep(*d).await;
                    Ok(v.clone())
                }
                Behavior::Hang => std::future::pending().await,
                Behavior::Panic => panic!("source exploded"),
            }
        }
    }

    fn lag() -> LagObservation {
        LagObservation::from_backlog(
            [("topicA".to_string(), [(0u32, 1000u64)].into_iter().collect())]
                .into_iter()
                .collect(),
        )
    }

    fn capacity() -> CapacityObservation {
        CapacityObservation::new(4, 40, 36, 1000, 500).unwrap()
    }

    fn history() -> HistoryObservation {
        HistoryObservation::new(vec![StageRecord::new(0, 1000, true).unwrap()])
    }

    fn aggregator(
        lag: Behavior<LagObservation>,
        capacity: Behavior<CapacityObservation>,
        history: Behavior<HistoryObservation>,
    ) -> MetricsAggregator {
        MetricsAggregator::new(
            Arc::new(FakeSource { kind: SignalKind::Lag, behavior: lag }),
            Arc::new(FakeSource { kind: SignalKind::Capacity, behavior: capacity }),
            Arc::new(FakeSource { kind: SignalKind::History, behavior: history }),
            AggregatorConfig::for_interval(Duration::from_secs(30), Duration::from_secs(3)),
            Arc::new(ManualClock::new(42_000)),
        )
    }

    #[test]
    fn config_derives_from_interval() {
        let config = AggregatorConfig::for_interval(Duration::from_secs(30), Duration::from_secs(3));
        assert_eq!(config.default_timeout, Duration::from_secs(10));
        assert_eq!(config.observe_budget, Duration::from_secs(27));
        assert_eq!(config.timeout_for(SignalKind::Lag), Duration::from_secs(10));
    }

    #[test]
    fn override_is_capped_by_budget() {
        let config = AggregatorConfig::for_interval(Duration::from_secs(30), Duration::from_secs(3))
            .with_timeout(SignalKind::History, Duration::from_secs(2))
            .with_timeout(SignalKind::Lag, Duration::from_secs(60));
        assert_eq!(config.timeout_for(SignalKind::History), Duration::from_secs(2));
        assert_eq!(config.timeout_for(SignalKind::Lag), Duration::from_secs(27));
        assert_eq!(config.timeout_for(SignalKind::Capacity), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn all_signals_present() {
        let agg = aggregator(Behavior::Ok(lag()), Behavior::Ok(capacity()), Behavior::Ok(history()));
        let obs = agg.observe().await;

        assert_eq!(obs.observed_at, 42_000);
        assert_eq!(obs.present_count(), 3);
        assert_eq!(obs.lag.as_ref().unwrap().total_backlog(), 1000);
        assert_eq!(agg.stats().signal(SignalKind::Lag).succeeded, 1);
        assert_eq!(agg.stats().insufficient(), 0);
    }

    #[tokio::test]
    async fn one_failure_degrades_but_stays_sufficient() {
        let agg = aggregator(Behavior::Ok(lag()), Behavior::Fail, Behavior::Ok(history()));
        let obs = agg.observe().await;

        assert!(obs.is_sufficient());
        assert!(matches!(obs.capacity, Err(SignalError::Unavailable(_))));
        assert_eq!(agg.stats().signal(SignalKind::Capacity).failed, 1);
    }

    #[tokio::test]
    async fn two_failures_flag_insufficient() {
        let agg = aggregator(Behavior::Ok(lag()), Behavior::Fail, Behavior::Violation);
        let obs = agg.observe().await;

        assert!(!obs.is_sufficient());
        assert!(matches!(obs.history, Err(SignalError::PolicyViolation(_))));
        assert_eq!(agg.stats().insufficient(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_signal_times_out() {
        let agg = aggregator(Behavior::Ok(lag()), Behavior::Ok(capacity()), Behavior::Hang);
        let obs = agg.observe().await;

        assert_eq!(obs.history.unwrap_err(), SignalError::Timeout(Duration::from_secs(10)));
        assert!(obs.lag.is_ok());
        assert_eq!(agg.stats().signal(SignalKind::History).timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fetches_run_concurrently() {
        let d = Duration::from_secs(3);
        let agg = aggregator(
            Behavior::Delay(d, lag()),
            Behavior::Delay(d, capacity()),
            Behavior::Delay(d, history()),
        );

        let started = Instant::now();
        let obs = agg.observe().await;
        let elapsed = started.elapsed();

        assert_eq!(obs.present_count(), 3);
        assert!(elapsed < Duration::from_secs(6), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn panicking_source_is_absent() {
        let agg = aggregator(Behavior::Panic, Behavior::Ok(capacity()), Behavior::Ok(history()));
        let obs = agg.observe().await;

        assert!(matches!(obs.lag, Err(SignalError::Unavailable(ref msg)) if msg.contains("lag")));
        assert!(obs.is_sufficient());
    }

    #[tokio::test]
    async fn all_failed_is_empty_not_an_error() {
        let agg = aggregator(Behavior::Fail, Behavior::Fail, Behavior::Fail);
        let obs = agg.observe().await;
        assert!(obs.is_empty());
        assert_eq!(obs.absent().len(), 3);
    }
}
