//! Domain types for one autoscaling cycle.
//!
//! Observations are validated on construction and immutable afterwards.
//! A `ClusterObservation` and the `ScalingDecision` derived from it live
//! for exactly one control-loop cycle; `CooldownState` lives for the
//! process.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::signal::SignalKind;

/// Monotonically increasing decision sequence number.
pub type Epoch = u64;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;

/// A signal value, or the reason it is missing.
pub type SignalOutcome<T> = Result<T, SignalError>;

// ── Lag ───────────────────────────────────────────────────────────

/// Raw offsets for one partition as reported by the broker manager.
///
/// Signed on purpose: upstream values are untrusted until validated by
/// `LagObservation::from_offsets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOffsets {
    pub topic: String,
    pub partition: i64,
    pub latest_offset: i64,
    pub committed_offset: i64,
}

/// Backlog depth per topic and partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LagObservation {
    topics: BTreeMap<String, BTreeMap<u32, u64>>,
}

impl LagObservation {
    /// Build from raw partition offsets.
    ///
    /// Fails with `PolicyViolation` on a negative partition index, a
    /// negative offset, a committed offset ahead of the latest one, or a
    /// partition listed twice for the same topic.
    pub fn from_offsets<I>(offsets: I) -> Result<Self, SignalError>
    where
        I: IntoIterator<Item = PartitionOffsets>,
    {
        let mut topics: BTreeMap<String, BTreeMap<u32, u64>> = BTreeMap::new();

        for p in offsets {
            let partition = u32::try_from(p.partition).map_err(|_| {
                SignalError::PolicyViolation(format!(
                    "topic {} has invalid partition index {}",
                    p.topic, p.partition
                ))
            })?;
            if p.latest_offset < 0 || p.committed_offset < 0 {
                return Err(SignalError::PolicyViolation(format!(
                    "topic {} partition {partition} has negative offset (latest {}, committed {})",
                    p.topic, p.latest_offset, p.committed_offset
                )));
            }
            if p.committed_offset > p.latest_offset {
                return Err(SignalError::PolicyViolation(format!(
                    "topic {} partition {partition} committed offset {} is ahead of latest {}",
                    p.topic, p.committed_offset, p.latest_offset
                )));
            }

            let backlog = (p.latest_offset - p.committed_offset) as u64;
            let partitions = topics.entry(p.topic.clone()).or_default();
            if partitions.insert(partition, backlog).is_some() {
                return Err(SignalError::PolicyViolation(format!(
                    "topic {} lists partition {partition} more than once",
                    p.topic
                )));
            }
        }

        Ok(Self { topics })
    }

    /// Build directly from backlog depths (already non-negative by type).
    pub fn from_backlog(topics: BTreeMap<String, BTreeMap<u32, u64>>) -> Self {
        Self { topics }
    }

    /// Sum of backlog across every topic and partition.
    pub fn total_backlog(&self) -> u64 {
        self.topics
            .values()
            .flat_map(|partitions| partitions.values())
            .fold(0u64, |acc, b| acc.saturating_add(*b))
    }

    /// Backlog for a single topic, if it was observed.
    pub fn topic_backlog(&self, topic: &str) -> Option<u64> {
        self.topics
            .get(topic)
            .map(|partitions| partitions.values().fold(0u64, |acc, b| acc.saturating_add(*b)))
    }

    pub fn topics(&self) -> &BTreeMap<String, BTreeMap<u32, u64>> {
        &self.topics
    }

    pub fn partition_count(&self) -> usize {
        self.topics.values().map(BTreeMap::len).sum()
    }
}

// ── Capacity ──────────────────────────────────────────────────────

/// Cluster inventory as reported by the cluster master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityObservation {
    workers: u32,
    total_cores: u32,
    used_cores: u32,
    total_memory_mb: u64,
    used_memory_mb: u64,
}

impl CapacityObservation {
    /// Validate raw inventory numbers.
    ///
    /// Negative counts, or usage above the total, are a `PolicyViolation`.
    pub fn new(
        workers: i64,
        total_cores: i64,
        used_cores: i64,
        total_memory_mb: i64,
        used_memory_mb: i64,
    ) -> Result<Self, SignalError> {
        let non_negative = |name: &str, v: i64| {
            if v < 0 {
                Err(SignalError::PolicyViolation(format!("{name} is negative ({v})")))
            } else {
                Ok(v)
            }
        };

        let workers = non_negative("workers", workers)?;
        let total_cores = non_negative("total cores", total_cores)?;
        let used_cores = non_negative("used cores", used_cores)?;
        let total_memory_mb = non_negative("total memory", total_memory_mb)?;
        let used_memory_mb = non_negative("used memory", used_memory_mb)?;

        if used_cores > total_cores {
            return Err(SignalError::PolicyViolation(format!(
                "used cores {used_cores} exceed total {total_cores}"
            )));
        }
        if used_memory_mb > total_memory_mb {
            return Err(SignalError::PolicyViolation(format!(
                "used memory {used_memory_mb}MB exceeds total {total_memory_mb}MB"
            )));
        }

        let workers = u32::try_from(workers)
            .map_err(|_| SignalError::PolicyViolation(format!("worker count {workers} out of range")))?;
        let total_cores = u32::try_from(total_cores)
            .map_err(|_| SignalError::PolicyViolation(format!("core count {total_cores} out of range")))?;

        Ok(Self {
            workers,
            total_cores,
            used_cores: used_cores as u32,
            total_memory_mb: total_memory_mb as u64,
            used_memory_mb: used_memory_mb as u64,
        })
    }

    pub fn workers(&self) -> u32 {
        self.workers
    }

    pub fn total_cores(&self) -> u32 {
        self.total_cores
    }

    pub fn available_cores(&self) -> u32 {
        self.total_cores - self.used_cores
    }

    pub fn total_memory_mb(&self) -> u64 {
        self.total_memory_mb
    }

    pub fn available_memory_mb(&self) -> u64 {
        self.total_memory_mb - self.used_memory_mb
    }

    /// Fraction of capacity currently unused, in `[0, 1]`.
    ///
    /// Takes the most constrained of cores and memory. A resource with a
    /// zero total is ignored; with no resources at all the headroom is 0.
    pub fn headroom_ratio(&self) -> f64 {
        let mut ratios = Vec::with_capacity(2);
        if self.total_cores > 0 {
            ratios.push(self.available_cores() as f64 / self.total_cores as f64);
        }
        if self.total_memory_mb > 0 {
            ratios.push(self.available_memory_mb() as f64 / self.total_memory_mb as f64);
        }

        ratios
            .into_iter()
            .reduce(f64::min)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0)
    }
}

// ── History ───────────────────────────────────────────────────────

/// One completed (or failed) stage execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage_id: Option<u64>,
    pub started_at: TimestampMs,
    pub ended_at: TimestampMs,
    pub succeeded: bool,
    pub input_records: Option<u64>,
    pub cores_used: Option<u32>,
}

impl StageRecord {
    /// Validate a stage interval. `end < start` is a `PolicyViolation`.
    pub fn new(started_at: i64, ended_at: i64, succeeded: bool) -> Result<Self, SignalError> {
        if started_at < 0 || ended_at < 0 {
            return Err(SignalError::PolicyViolation(format!(
                "stage has negative timestamp (start {started_at}, end {ended_at})"
            )));
        }
        if ended_at < started_at {
            return Err(SignalError::PolicyViolation(format!(
                "stage ends at {ended_at} before it starts at {started_at}"
            )));
        }
        Ok(Self {
            stage_id: None,
            started_at: started_at as u64,
            ended_at: ended_at as u64,
            succeeded,
            input_records: None,
            cores_used: None,
        })
    }

    pub fn with_stage_id(mut self, id: u64) -> Self {
        self.stage_id = Some(id);
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.ended_at - self.started_at)
    }
}

/// Recent stage executions, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryObservation {
    records: Vec<StageRecord>,
}

impl HistoryObservation {
    /// Order records by recency (latest start first).
    pub fn new(mut records: Vec<StageRecord>) -> Self {
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Self { records }
    }

    /// Apply the retention window: keep at most `max_records`, and drop
    /// anything that ended more than `max_age` before `now`.
    pub fn retain_window(mut self, max_records: usize, max_age: Duration, now: TimestampMs) -> Self {
        let cutoff = now.saturating_sub(max_age.as_millis() as u64);
        self.records.retain(|r| r.ended_at >= cutoff);
        self.records.truncate(max_records);
        self
    }

    /// The `k` most recent records (fewer if history is shorter).
    pub fn recent(&self, k: usize) -> &[StageRecord] {
        &self.records[..k.min(self.records.len())]
    }

    pub fn records(&self) -> &[StageRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ── Observation ───────────────────────────────────────────────────

/// One cycle's view of the cluster, with per-signal success flags.
#[derive(Debug, Clone)]
pub struct ClusterObservation {
    pub observed_at: TimestampMs,
    pub lag: SignalOutcome<LagObservation>,
    pub capacity: SignalOutcome<CapacityObservation>,
    pub history: SignalOutcome<HistoryObservation>,
}

impl ClusterObservation {
    /// Minimum number of present signals for a usable observation.
    pub const MIN_PRESENT: usize = 2;

    /// Number of signals that were collected successfully.
    pub fn present_count(&self) -> usize {
        [self.lag.is_ok(), self.capacity.is_ok(), self.history.is_ok()]
            .into_iter()
            .filter(|ok| *ok)
            .count()
    }

    /// At least two of the three signals are present.
    pub fn is_sufficient(&self) -> bool {
        self.present_count() >= Self::MIN_PRESENT
    }

    /// No signal at all; such an observation never reaches the engine.
    pub fn is_empty(&self) -> bool {
        self.present_count() == 0
    }

    /// Signals that are missing, with the reason.
    pub fn absent(&self) -> Vec<(SignalKind, &SignalError)> {
        let mut out = Vec::new();
        if let Err(e) = &self.lag {
            out.push((SignalKind::Lag, e));
        }
        if let Err(e) = &self.capacity {
            out.push((SignalKind::Capacity, e));
        }
        if let Err(e) = &self.history {
            out.push((SignalKind::History, e));
        }
        out
    }

    pub fn is_present(&self, kind: SignalKind) -> bool {
        match kind {
            SignalKind::Lag => self.lag.is_ok(),
            SignalKind::Capacity => self.capacity.is_ok(),
            SignalKind::History => self.history.is_ok(),
        }
    }
}

// ── Decision ──────────────────────────────────────────────────────

/// What the autoscaler wants the orchestrator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    NoOp,
}

impl ScaleAction {
    pub fn is_noop(&self) -> bool {
        matches!(self, ScaleAction::NoOp)
    }
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScaleAction::ScaleUp => "scale_up",
            ScaleAction::ScaleDown => "scale_down",
            ScaleAction::NoOp => "no_op",
        })
    }
}

/// Why the engine chose its action.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionReason {
    /// Fewer than two signals were present.
    InsufficientData { present: usize },
    /// No workers while backlog exists.
    ColdStart { backlog: u64 },
    /// Backlog, slow stages and low headroom all point up.
    Pressure,
    /// Low backlog, no slow stages and plenty of headroom.
    Underutilized,
    /// Inside the hysteresis band, or triggers disagree.
    WithinBand,
    /// Lag is absent; never scale up blind.
    LagUnknown,
    /// Capacity is absent; backlog per worker cannot be computed.
    CapacityUnknown,
    /// A candidate was demoted because the last action is too recent.
    Cooldown { candidate: ScaleAction, remaining: Duration },
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionReason::InsufficientData { present } => {
                write!(f, "insufficient data ({present}/3 signals)")
            }
            DecisionReason::ColdStart { backlog } => write!(f, "cold start with backlog {backlog}"),
            DecisionReason::Pressure => f.write_str("backlog and duration pressure"),
            DecisionReason::Underutilized => f.write_str("cluster underutilized"),
            DecisionReason::WithinBand => f.write_str("within hysteresis band"),
            DecisionReason::LagUnknown => f.write_str("lag unknown"),
            DecisionReason::CapacityUnknown => f.write_str("capacity unknown"),
            DecisionReason::Cooldown { candidate, remaining } => {
                write!(f, "{candidate} suppressed by cooldown ({remaining:?} remaining)")
            }
        }
    }
}

/// Derived inputs the engine computed, kept for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DecisionInputs {
    pub total_backlog: Option<u64>,
    pub backlog_per_worker: Option<f64>,
    pub duration_pressure: f64,
    pub headroom_ratio: Option<f64>,
}

/// The outcome of one policy evaluation.
#[derive(Debug, Clone)]
pub struct ScalingDecision {
    pub epoch: Epoch,
    pub action: ScaleAction,
    pub reason: DecisionReason,
    pub inputs: DecisionInputs,
    pub decided_at: TimestampMs,
    pub observation: Arc<ClusterObservation>,
}

impl ScalingDecision {
    pub fn is_noop(&self) -> bool {
        self.action.is_noop()
    }

    /// Whether the cooldown gate did not apply to this decision.
    pub fn is_cooldown_exempt(&self) -> bool {
        matches!(self.reason, DecisionReason::ColdStart { .. })
    }
}

// ── Cooldown ──────────────────────────────────────────────────────

/// Last non-no-op action and when it was issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CooldownState {
    last: Option<(ScaleAction, TimestampMs)>,
}

impl CooldownState {
    /// No prior decision.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a non-no-op action. No-ops are ignored.
    pub fn record(&mut self, action: ScaleAction, at: TimestampMs) {
        if !action.is_noop() {
            self.last = Some((action, at));
        }
    }

    pub fn last_action(&self) -> Option<ScaleAction> {
        self.last.map(|(a, _)| a)
    }

    pub fn last_decision_at(&self) -> Option<TimestampMs> {
        self.last.map(|(_, at)| at)
    }

    /// Time left before another action is allowed, or `None` if free.
    pub fn remaining(&self, now: TimestampMs, interval: Duration) -> Option<Duration> {
        let (_, at) = self.last?;
        let elapsed = now.saturating_sub(at);
        let interval_ms = interval.as_millis() as u64;
        (elapsed < interval_ms).then(|| Duration::from_millis(interval_ms - elapsed))
    }
}
