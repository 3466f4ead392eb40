//! Signal registry and the `SignalSource` capability.
//!
//! `SignalKind` is the closed set of signals the autoscaler knows about.
//! Configuration refers to signals by name; names are resolved here and
//! anything outside the set is rejected with `UnknownSignal`.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SignalError, UnknownSignal};

/// The three upstream signals feeding a scaling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Consumer backlog from the message-broker manager.
    Lag,
    /// Worker/core/memory inventory from the cluster master.
    Capacity,
    /// Recent stage durations from the orchestrator.
    History,
}

impl SignalKind {
    /// Every known signal, in collection order.
    pub const ALL: [SignalKind; 3] = [SignalKind::Lag, SignalKind::Capacity, SignalKind::History];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Lag => "lag",
            SignalKind::Capacity => "capacity",
            SignalKind::History => "history",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = UnknownSignal;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lag" => Ok(SignalKind::Lag),
            "capacity" => Ok(SignalKind::Capacity),
            "history" => Ok(SignalKind::History),
            _ => Err(UnknownSignal(s.to_string())),
        }
    }
}

/// A single upstream signal that can be fetched on demand.
///
/// Implementations perform one round trip per call and must not retry
/// internally; the aggregator owns timeouts and treats any error as an
/// absent signal for the current cycle.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// The validated observation this source produces.
    type Output: Send + 'static;

    /// Which signal this source provides.
    fn kind(&self) -> SignalKind;

    /// Fetch the current value.
    async fn fetch(&self) -> Result<Self::Output, SignalError>;
}
