//! Policy thresholds.

use std::time::Duration;

use thiserror::Error;

/// Tunable thresholds for the scaling policy.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    /// Backlog per worker above which upscale is considered.
    pub upscale_backlog_per_worker: f64,
    /// Backlog per worker below which downscale is considered.
    pub downscale_backlog_per_worker: f64,
    /// A stage slower than this counts towards duration pressure.
    pub duration_sla: Duration,
    /// Duration pressure must exceed this for upscale.
    pub duration_pressure_threshold: f64,
    /// How many recent stages feed duration pressure (K).
    pub recent_stages: usize,
    /// Headroom must be below this for upscale.
    pub headroom_ceiling: f64,
    /// Headroom must be above this for downscale.
    pub headroom_floor: f64,
    /// Minimum time between two non-no-op decisions.
    pub cooldown: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            upscale_backlog_per_worker: 200.0,
            downscale_backlog_per_worker: 20.0,
            duration_sla: Duration::from_secs(60),
            duration_pressure_threshold: 0.3,
            recent_stages: 10,
            headroom_ceiling: 0.8,
            headroom_floor: 0.7,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyConfigError {
    #[error("{field} must be a finite, non-negative number (got {value})")]
    Invalid { field: &'static str, value: f64 },

    #[error(
        "upscale threshold {upper} must be greater than downscale threshold {lower}; \
         the bands would overlap"
    )]
    OverlappingBands { lower: f64, upper: f64 },

    #[error("{field} must be within [0, 1] (got {value})")]
    RatioOutOfRange { field: &'static str, value: f64 },

    #[error("recent_stages must be at least 1")]
    NoRecentStages,

    #[error("duration_sla must be greater than zero")]
    ZeroSla,
}

impl PolicyConfig {
    /// Check ordering and range constraints.
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        for (field, value) in [
            ("upscale_backlog_per_worker", self.upscale_backlog_per_worker),
            ("downscale_backlog_per_worker", self.downscale_backlog_per_worker),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PolicyConfigError::Invalid { field, value });
            }
        }

        if self.upscale_backlog_per_worker <= self.downscale_backlog_per_worker {
            return Err(PolicyConfigError::OverlappingBands {
                lower: self.downscale_backlog_per_worker,
                upper: self.upscale_backlog_per_worker,
            });
        }

        for (field, value) in [
            ("duration_pressure_threshold", self.duration_pressure_threshold),
            ("headroom_ceiling", self.headroom_ceiling),
            ("headroom_floor", self.headroom_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PolicyConfigError::RatioOutOfRange { field, value });
            }
        }

        if self.recent_stages == 0 {
            return Err(PolicyConfigError::NoRecentStages);
        }
        if self.duration_sla.is_zero() {
            return Err(PolicyConfigError::ZeroSla);
        }
        Ok(())
    }
}
