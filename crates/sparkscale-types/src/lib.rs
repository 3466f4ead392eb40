//! sparkscale-types — shared data model for the sparkscale autoscaler.
//!
//! Everything that crosses a crate boundary lives here: the per-signal
//! observations, the combined `ClusterObservation`, the `ScalingDecision`
//! emitted by the policy engine, the cooldown record owned by the control
//! loop, and the injectable `Clock`.
//!
//! # Lifecycle
//!
//! ```text
//! SignalSource::fetch()  ──►  LagObservation / CapacityObservation / HistoryObservation
//!                                     │  (absent on error, timeout or PolicyViolation)
//!                                     ▼
//!                             ClusterObservation  (immutable, one per cycle)
//!                                     │
//!                                     ▼
//!                             ScalingDecision { epoch, action, reason }
//! ```
//!
//! Observations validate their invariants on construction, so a negative
//! offset or an inverted stage interval can never reach the policy engine
//! as a number; it arrives as an absent signal instead.

pub mod clock;
pub mod error;
pub mod signal;
pub mod types;

pub use clock::{Clock, EpochCounter, ManualClock, SystemClock};
pub use error::{SignalError, UnknownSignal};
pub use signal::{SignalKind, SignalSource};
pub use types::*;
