//! sparkscaled.toml configuration parser.
//!
//! Every section is optional. Durations are strings such as `"30s"`,
//! `"500ms"`, `"5m"` or `"1h"`; a bare number means seconds.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sparkscale_client::{HttpClient, TransportError, validate_header};
use sparkscale_dispatch::RetryPolicy;
use sparkscale_metrics::AggregatorConfig;
use sparkscale_policy::{PolicyConfig, PolicyConfigError};
use sparkscale_types::{SignalKind, UnknownSignal};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{field}: invalid duration '{value}'")]
    InvalidDuration { field: String, value: String },

    #[error("{field}: {source}")]
    InvalidUrl {
        field: &'static str,
        source: TransportError,
    },

    #[error("signals.timeouts: {0}")]
    UnknownSignal(#[from] UnknownSignal),

    #[error("policy: {0}")]
    Policy(#[from] PolicyConfigError),

    #[error("control.interval ({interval:?}) must be longer than control.observe_margin ({margin:?})")]
    IntervalTooShort { interval: Duration, margin: Duration },

    #[error("retry.max_attempts must be at least 1")]
    NoAttempts,

    #[error("retry.base_backoff ({base:?}) exceeds retry.max_backoff ({max:?})")]
    BackoffInverted { base: Duration, max: Duration },

    #[error("orchestrator.history_limit must be at least 1")]
    EmptyHistory,

    #[error("orchestrator.headers: {0}")]
    InvalidHeader(TransportError),
}

// ── File format ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub kafka_manager: KafkaManagerSection,
    pub spark_master: SparkMasterSection,
    pub orchestrator: OrchestratorSection,
    pub control: ControlSection,
    pub signals: SignalsSection,
    pub policy: PolicySection,
    pub retry: RetrySection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KafkaManagerSection {
    pub host: String,
    pub cluster_name: String,
    /// Topics to observe; empty means all.
    pub topics: Vec<String>,
}

impl Default for KafkaManagerSection {
    fn default() -> Self {
        Self {
            host: "http://localhost:9000".to_string(),
            cluster_name: "default".to_string(),
            topics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SparkMasterSection {
    pub host: String,
}

impl Default for SparkMasterSection {
    fn default() -> Self {
        Self {
            host: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorSection {
    pub url: String,
    /// Sent on every orchestrator request.
    pub headers: BTreeMap<String, String>,
    pub history_limit: usize,
    pub history_max_age: String,
    /// Timeout for one scale request attempt.
    pub request_timeout: String,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            url: "http://localhost:8081".to_string(),
            headers: BTreeMap::new(),
            history_limit: 50,
            history_max_age: "1h".to_string(),
            request_timeout: "5s".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControlSection {
    pub interval: String,
    /// Subtracted from the interval to bound the observation phase.
    pub observe_margin: String,
    pub shutdown_grace: String,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            interval: "30s".to_string(),
            observe_margin: "3s".to_string(),
            shutdown_grace: "10s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SignalsSection {
    /// Default per-signal timeout; a third of the interval when unset.
    pub timeout: Option<String>,
    /// Overrides keyed by signal name.
    pub timeouts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicySection {
    pub upscale_backlog_per_worker: f64,
    pub downscale_backlog_per_worker: f64,
    pub duration_sla: String,
    pub duration_pressure_threshold: f64,
    pub recent_stages: usize,
    pub headroom_ceiling: f64,
    pub headroom_floor: f64,
    pub cooldown: String,
}

impl Default for PolicySection {
    fn default() -> Self {
        let p = PolicyConfig::default();
        Self {
            upscale_backlog_per_worker: p.upscale_backlog_per_worker,
            downscale_backlog_per_worker: p.downscale_backlog_per_worker,
            duration_sla: "60s".to_string(),
            duration_pressure_threshold: p.duration_pressure_threshold,
            recent_stages: p.recent_stages,
            headroom_ceiling: p.headroom_ceiling,
            headroom_floor: p.headroom_floor,
            cooldown: "5m".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_backoff: String,
    pub max_backoff: String,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: "500ms".to_string(),
            max_backoff: "10s".to_string(),
        }
    }
}

// ── Resolved settings ─────────────────────────────────────────────

/// Validated configuration with typed values and ready HTTP transports.
#[derive(Debug, Clone)]
pub struct Settings {
    pub kafka_http: HttpClient,
    pub cluster_name: String,
    pub topics: Vec<String>,
    pub spark_http: HttpClient,
    pub history_http: HttpClient,
    pub scale_http: HttpClient,
    pub orchestrator_headers: Vec<(String, String)>,
    pub history_limit: usize,
    pub history_max_age: Duration,
    pub interval: Duration,
    pub shutdown_grace: Duration,
    pub aggregator: AggregatorConfig,
    pub policy: PolicyConfig,
    pub retry: RetryPolicy,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Validate and convert into typed settings.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let interval = duration("control.interval", &self.control.interval)?;
        let margin = duration("control.observe_margin", &self.control.observe_margin)?;
        if interval <= margin {
            return Err(ConfigError::IntervalTooShort { interval, margin });
        }

        let mut aggregator = AggregatorConfig::for_interval(interval, margin);
        if let Some(timeout) = &self.signals.timeout {
            aggregator.default_timeout = duration("signals.timeout", timeout)?;
        }
        for (name, value) in &self.signals.timeouts {
            let kind: SignalKind = name.parse()?;
            let timeout = duration(&format!("signals.timeouts.{name}"), value)?;
            aggregator = aggregator.with_timeout(kind, timeout);
        }

        let p = &self.policy;
        let policy = PolicyConfig {
            upscale_backlog_per_worker: p.upscale_backlog_per_worker,
            downscale_backlog_per_worker: p.downscale_backlog_per_worker,
            duration_sla: duration("policy.duration_sla", &p.duration_sla)?,
            duration_pressure_threshold: p.duration_pressure_threshold,
            recent_stages: p.recent_stages,
            headroom_ceiling: p.headroom_ceiling,
            headroom_floor: p.headroom_floor,
            cooldown: duration("policy.cooldown", &p.cooldown)?,
        };
        policy.validate()?;

        let retry = RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_backoff: duration("retry.base_backoff", &self.retry.base_backoff)?,
            max_backoff: duration("retry.max_backoff", &self.retry.max_backoff)?,
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if retry.base_backoff > retry.max_backoff {
            return Err(ConfigError::BackoffInverted {
                base: retry.base_backoff,
                max: retry.max_backoff,
            });
        }

        if self.orchestrator.history_limit == 0 {
            return Err(ConfigError::EmptyHistory);
        }
        for (name, value) in &self.orchestrator.headers {
            validate_header(name, value).map_err(ConfigError::InvalidHeader)?;
        }

        let http = |field: &'static str, url: &str, timeout: Duration| {
            HttpClient::new(url, timeout).map_err(|source| ConfigError::InvalidUrl { field, source })
        };

        Ok(Settings {
            kafka_http: http(
                "kafka_manager.host",
                &self.kafka_manager.host,
                aggregator.timeout_for(SignalKind::Lag),
            )?,
            cluster_name: self.kafka_manager.cluster_name.clone(),
            topics: self.kafka_manager.topics.clone(),
            spark_http: http(
                "spark_master.host",
                &self.spark_master.host,
                aggregator.timeout_for(SignalKind::Capacity),
            )?,
            history_http: http(
                "orchestrator.url",
                &self.orchestrator.url,
                aggregator.timeout_for(SignalKind::History),
            )?,
            scale_http: http(
                "orchestrator.url",
                &self.orchestrator.url,
                duration("orchestrator.request_timeout", &self.orchestrator.request_timeout)?,
            )?,
            orchestrator_headers: self
                .orchestrator
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            history_limit: self.orchestrator.history_limit,
            history_max_age: duration("orchestrator.history_max_age", &self.orchestrator.history_max_age)?,
            interval,
            shutdown_grace: duration("control.shutdown_grace", &self.control.shutdown_grace)?,
            aggregator,
            policy,
            retry,
        })
    }
}

fn duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "5m", "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
