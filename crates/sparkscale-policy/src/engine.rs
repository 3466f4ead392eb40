//! Scaling policy engine.

use std::sync::Arc;

use sparkscale_types::{
    CapacityObservation, ClusterObservation, CooldownState, DecisionInputs, DecisionReason, Epoch,
    HistoryObservation, LagObservation, ScaleAction, ScalingDecision, TimestampMs,
};

use crate::config::{PolicyConfig, PolicyConfigError};

/// Evaluates observations against a validated `PolicyConfig`.
#[derive(Debug, Clone)]
pub struct ScalingPolicyEngine {
    config: PolicyConfig,
}

impl ScalingPolicyEngine {
    /// Create an engine. Fails if the thresholds are inconsistent.
    pub fn new(config: PolicyConfig) -> Result<Self, PolicyConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Decide what to do for one observation.
    ///
    /// Deterministic: the same observation, cooldown state, time and epoch
    /// always yield the same decision.
    pub fn decide(
        &self,
        observation: Arc<ClusterObservation>,
        cooldown: &CooldownState,
        now: TimestampMs,
        epoch: Epoch,
    ) -> ScalingDecision {
        let inputs = self.inputs(&observation);
        let (candidate, reason) = self.evaluate(&observation, &inputs);

        let (action, reason) = match cooldown.remaining(now, self.config.cooldown) {
            Some(remaining)
                if !candidate.is_noop() && !matches!(reason, DecisionReason::ColdStart { .. }) =>
            {
                (ScaleAction::NoOp, DecisionReason::Cooldown { candidate, remaining })
            }
            _ => (candidate, reason),
        };

        ScalingDecision {
            epoch,
            action,
            reason,
            inputs,
            decided_at: now,
            observation,
        }
    }

    /// Share of the last K stages whose duration exceeds the SLA.
    pub fn duration_pressure(&self, history: &HistoryObservation) -> f64 {
        let recent = history.recent(self.config.recent_stages);
        if recent.is_empty() {
            return 0.0;
        }
        let slow = recent
            .iter()
            .filter(|r| r.duration() > self.config.duration_sla)
            .count();
        slow as f64 / recent.len() as f64
    }

    fn inputs(&self, obs: &ClusterObservation) -> DecisionInputs {
        let lag = obs.lag.as_ref().ok();
        let capacity = obs.capacity.as_ref().ok();

        DecisionInputs {
            total_backlog: lag.map(LagObservation::total_backlog),
            backlog_per_worker: lag.zip(capacity).and_then(|(l, c)| backlog_per_worker(l, c)),
            duration_pressure: obs
                .history
                .as_ref()
                .map(|h| self.duration_pressure(h))
                .unwrap_or(0.0),
            headroom_ratio: capacity.map(CapacityObservation::headroom_ratio),
        }
    }

    fn evaluate(&self, obs: &ClusterObservation, inputs: &DecisionInputs) -> (ScaleAction, DecisionReason) {
        if !obs.is_sufficient() {
            return (
                ScaleAction::NoOp,
                DecisionReason::InsufficientData {
                    present: obs.present_count(),
                },
            );
        }

        let (Ok(capacity), Some(backlog)) = (&obs.capacity, inputs.total_backlog) else {
            return match inputs.total_backlog {
                None => (ScaleAction::NoOp, DecisionReason::LagUnknown),
                Some(_) => (ScaleAction::NoOp, DecisionReason::CapacityUnknown),
            };
        };

        if capacity.workers() == 0 {
            return if backlog > 0 {
                (ScaleAction::ScaleUp, DecisionReason::ColdStart { backlog })
            } else {
                (ScaleAction::NoOp, DecisionReason::WithinBand)
            };
        }

        // workers > 0 and both signals present, so these are set.
        let bpw = inputs.backlog_per_worker.unwrap_or_default();
        let headroom = inputs.headroom_ratio.unwrap_or_default();
        let pressure = inputs.duration_pressure;
        let c = &self.config;

        if bpw > c.upscale_backlog_per_worker
            && pressure > c.duration_pressure_threshold
            && headroom < c.headroom_ceiling
        {
            (ScaleAction::ScaleUp, DecisionReason::Pressure)
        } else if bpw < c.downscale_backlog_per_worker && pressure == 0.0 && headroom > c.headroom_floor {
            (ScaleAction::ScaleDown, DecisionReason::Underutilized)
        } else {
            (ScaleAction::NoOp, DecisionReason::WithinBand)
        }
    }
}

fn backlog_per_worker(lag: &LagObservation, capacity: &CapacityObservation) -> Option<f64> {
    match capacity.workers() {
        0 => None,
        workers => Some(lag.total_backlog() as f64 / workers as f64),
    }
}
