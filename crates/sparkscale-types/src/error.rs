//! Error types for signal collection.

use std::time::Duration;

use thiserror::Error;

/// Why a signal is absent from an observation.
///
/// None of these are fatal: the aggregator records them next to the
/// missing value and the policy engine degrades accordingly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// The upstream service errored or could not be reached.
    #[error("signal unavailable: {0}")]
    Unavailable(String),

    /// The fetch did not complete within its budget.
    #[error("signal timed out after {0:?}")]
    Timeout(Duration),

    /// The upstream answered with values that break an invariant
    /// (negative offsets, used > total, end before start, ...).
    #[error("policy violation: {0}")]
    PolicyViolation(String),
}

/// A signal name outside the closed set of known signals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown signal '{0}' (expected one of: lag, capacity, history)")]
pub struct UnknownSignal(pub String);
