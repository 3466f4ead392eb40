//! Control loop — drives one decision cycle per interval.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use sparkscale_dispatch::DispatchQueue;
use sparkscale_metrics::MetricsAggregator;
use sparkscale_policy::ScalingPolicyEngine;
use sparkscale_types::{
    Clock, CooldownState, DecisionInputs, DecisionReason, Epoch, EpochCounter, ScaleAction, ScalingDecision,
};

/// Where the loop is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Observing,
    Deciding,
    Dispatching,
    /// Terminal.
    Stopped,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopState::Idle => "idle",
            LoopState::Observing => "observing",
            LoopState::Deciding => "deciding",
            LoopState::Dispatching => "dispatching",
            LoopState::Stopped => "stopped",
        })
    }
}

/// Summary of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub decision: ScalingDecision,
    /// The decision was handed to the dispatch queue.
    pub queued: bool,
    /// Epoch of a queued decision this one replaced.
    pub superseded: Option<Epoch>,
}

impl CycleReport {
    pub fn epoch(&self) -> Epoch {
        self.decision.epoch
    }

    pub fn action(&self) -> ScaleAction {
        self.decision.action
    }
}

/// The periodic observe, decide, dispatch loop.
pub struct ControlLoop {
    aggregator: MetricsAggregator,
    engine: ScalingPolicyEngine,
    queue: DispatchQueue,
    clock: Arc<dyn Clock>,
    cooldown: CooldownState,
    epochs: EpochCounter,
    state: watch::Sender<LoopState>,
}

impl ControlLoop {
    pub fn new(
        aggregator: MetricsAggregator,
        engine: ScalingPolicyEngine,
        queue: DispatchQueue,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            aggregator,
            engine,
            queue,
            clock,
            cooldown: CooldownState::new(),
            epochs: EpochCounter::new(),
            state,
        }
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Watch state transitions, including the final `Stopped`.
    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn cooldown(&self) -> &CooldownState {
        &self.cooldown
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Run a single cycle.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.transition(LoopState::Observing);
        let observation = Arc::new(self.aggregator.observe().await);
        let epoch = self.epochs.advance();

        self.transition(LoopState::Deciding);
        let now = self.clock.now_ms();
        let decision = if observation.is_empty() {
            warn!(epoch, "no signals available, skipping policy evaluation");
            ScalingDecision {
                epoch,
                action: ScaleAction::NoOp,
                reason: DecisionReason::InsufficientData { present: 0 },
                inputs: DecisionInputs::default(),
                decided_at: now,
                observation,
            }
        } else {
            self.engine.decide(observation, &self.cooldown, now, epoch)
        };

        let inputs = decision.inputs;
        if decision.is_noop() {
            debug!(
                epoch,
                reason = %decision.reason,
                backlog = ?inputs.total_backlog,
                backlog_per_worker = ?inputs.backlog_per_worker,
                duration_pressure = inputs.duration_pressure,
                headroom = ?inputs.headroom_ratio,
                "no scaling action"
            );
            self.transition(LoopState::Idle);
            return CycleReport {
                decision,
                queued: false,
                superseded: None,
            };
        }

        info!(
            epoch,
            action = %decision.action,
            reason = %decision.reason,
            backlog = ?inputs.total_backlog,
            backlog_per_worker = ?inputs.backlog_per_worker,
            duration_pressure = inputs.duration_pressure,
            headroom = ?inputs.headroom_ratio,
            "scaling decision"
        );
        self.cooldown.record(decision.action, now);

        self.transition(LoopState::Dispatching);
        let superseded = self.queue.submit(decision.clone());
        self.transition(LoopState::Idle);

        CycleReport {
            decision,
            queued: true,
            superseded,
        }
    }

    /// Run cycles every `interval` until `shutdown` flips, then stop the
    /// dispatch queue, allowing it `grace` to finish.
    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>, grace: Duration) {
        info!(interval = ?interval, "control loop started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        report = self.run_cycle() => {
                            debug!(epoch = report.epoch(), action = %report.action(), "cycle complete");
                        }
                        _ = shutdown.changed() => {
                            info!("control loop shutting down, abandoning cycle in progress");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("control loop shutting down");
                    break;
                }
            }
            if *shutdown.borrow() {
                info!("control loop shutting down");
                break;
            }
        }

        self.stop(grace).await;
    }

    /// Enter `Stopped` and release the dispatch worker.
    pub async fn stop(self, grace: Duration) {
        self.transition(LoopState::Stopped);
        self.queue.shutdown(grace).await;
        info!(last_epoch = self.epochs.last(), "control loop stopped");
    }

    fn transition(&self, next: LoopState) {
        self.state.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use async_trait::async_trait;
    use sparkscale_client::{ClientError, ScaleAck, ScaleRequestSink, ScaleSparkClusterRequest};
    use sparkscale_dispatch::{RetryPolicy, ScaleRequestDispatcher};
    use sparkscale_metrics::AggregatorConfig;
    use sparkscale_policy::PolicyConfig;
    use sparkscale_types::{
        CapacityObservation, HistoryObservation, LagObservation, ManualClock, SignalError, SignalKind,
        SignalSource, StageRecord,
    };

    /// A source that returns whatever is currently stored.
    struct StubSource<T> {
        kind: SignalKind,
        value: Arc<Mutex<Result<T, SignalError>>>,
        fetches: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl<T: Clone + Send + Sync + 'static> SignalSource for StubSource<T> {
        type Output = T;

        fn kind(&self) -> SignalKind {
            self.kind
        }

        async fn fetch(&self) -> Result<T, SignalError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.value.lock().unwrap().clone()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        requests: Mutex<Vec<ScaleSparkClusterRequest>>,
    }

    #[async_trait]
    impl ScaleRequestSink for RecordingSink {
        async fn submit(&self, request: &ScaleSparkClusterRequest) -> Result<ScaleAck, ClientError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(ScaleAck::new())
        }
    }

    type Slot<T> = Arc<Mutex<Result<T, SignalError>>>;

    struct Harness {
        lag: Slot<LagObservation>,
        capacity: Slot<CapacityObservation>,
        history: Slot<HistoryObservation>,
        clock: Arc<ManualClock>,
        sink: Arc<RecordingSink>,
        lag_fetches: Arc<AtomicUsize>,
    }

    fn backlog(total: u64) -> LagObservation {
        LagObservation::from_backlog(
            [("topicA".to_string(), [(0u32, total)].into_iter().collect())]
                .into_iter()
                .collect(),
        )
    }

    fn harness() -> (Harness, ControlLoop) {
        harness_with_lag_delay(Duration::ZERO)
    }

    fn harness_with_lag_delay(lag_delay: Duration) -> (Harness, ControlLoop) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let h = Harness {
            lag: Arc::new(Mutex::new(Ok(backlog(1000)))),
            capacity: Arc::new(Mutex::new(CapacityObservation::new(4, 100, 90, 0, 0))),
            history: Arc::new(Mutex::new(Ok(HistoryObservation::new(
                (0..10)
                    .map(|i| StageRecord::new(i * 100_000, i * 100_000 + 90_000, true).unwrap())
                    .collect(),
            )))),
            clock: clock.clone(),
            sink: Arc::new(RecordingSink::default()),
            lag_fetches: Arc::default(),
        };

        let aggregator = MetricsAggregator::new(
            Arc::new(StubSource {
                kind: SignalKind::Lag,
                value: h.lag.clone(),
                fetches: h.lag_fetches.clone(),
                delay: lag_delay,
            }),
            Arc::new(StubSource {
                kind: SignalKind::Capacity,
                value: h.capacity.clone(),
                fetches: Arc::default(),
                delay: Duration::ZERO,
            }),
            Arc::new(StubSource {
                kind: SignalKind::History,
                value: h.history.clone(),
                fetches: Arc::default(),
                delay: Duration::ZERO,
            }),
            AggregatorConfig::for_interval(Duration::from_secs(30), Duration::from_secs(3)),
            clock.clone(),
        );
        let engine = ScalingPolicyEngine::new(PolicyConfig::default()).unwrap();
        let dispatcher = ScaleRequestDispatcher::new(h.sink.clone(), RetryPolicy::default(), clock.clone());
        let queue = DispatchQueue::spawn(Arc::new(dispatcher));

        (h, ControlLoop::new(aggregator, engine, queue, clock))
    }

    #[tokio::test]
    async fn starts_idle_and_returns_to_idle() {
        let (_h, mut control) = harness();
        let states = control.subscribe();
        assert_eq!(control.state(), LoopState::Idle);

        let report = control.run_cycle().await;
        assert_eq!(report.action(), ScaleAction::ScaleUp);
        assert!(report.queued);
        assert_eq!(control.state(), LoopState::Idle);
        assert!(states.has_changed().unwrap());
    }

    #[tokio::test]
    async fn epochs_increase_every_cycle() {
        let (h, mut control) = harness();
        *h.lag.lock().unwrap() = Ok(backlog(100));

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(control.run_cycle().await.epoch());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn non_noop_updates_cooldown() {
        let (h, mut control) = harness();

        let first = control.run_cycle().await;
        assert_eq!(first.action(), ScaleAction::ScaleUp);
        assert_eq!(control.cooldown().last_action(), Some(ScaleAction::ScaleUp));
        assert_eq!(control.cooldown().last_decision_at(), Some(1_000_000));

        h.clock.advance(Duration::from_secs(30));
        let second = control.run_cycle().await;
        assert_eq!(second.action(), ScaleAction::NoOp);
        assert!(matches!(second.decision.reason, DecisionReason::Cooldown { .. }));
        assert!(!second.queued);
    }

    #[tokio::test]
    async fn empty_observation_short_circuits() {
        let (h, mut control) = harness();
        *h.lag.lock().unwrap() = Err(SignalError::Unavailable("down".into()));
        *h.capacity.lock().unwrap() = Err(SignalError::Timeout(Duration::from_secs(10)));
        *h.history.lock().unwrap() = Err(SignalError::Unavailable("down".into()));

        let report = control.run_cycle().await;
        assert_eq!(report.epoch(), 1);
        assert_eq!(report.action(), ScaleAction::NoOp);
        assert_eq!(report.decision.reason, DecisionReason::InsufficientData { present: 0 });
        assert!(h.sink.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_is_terminal() {
        let (_h, control) = harness();
        let states = control.subscribe();
        control.stop(Duration::from_secs(1)).await;
        assert_eq!(*states.borrow(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_until_shutdown() {
        let (h, control) = harness();
        *h.lag.lock().unwrap() = Ok(backlog(100));
        let states = control.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(control.run(Duration::from_secs(30), shutdown_rx, Duration::from_secs(1)));

        // Ticks at 0s, 30s and 60s.
        tokio::time::sleep(Duration::from_secs(65)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(h.lag_fetches.load(Ordering::SeqCst), 3);
        assert_eq!(*states.borrow(), LoopState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_slow_observation() {
        let (h, control) = harness_with_lag_delay(Duration::from_secs(20));
        let states = control.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let started = tokio::time::Instant::now();

        let handle = tokio::spawn(control.run(Duration::from_secs(30), shutdown_rx, Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.lag_fetches.load(Ordering::SeqCst), 1);
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // The lag fetch alone would hold the cycle for its 10s timeout.
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(*states.borrow(), LoopState::Stopped);
        assert!(h.sink.requests.lock().unwrap().is_empty());
    }
}
