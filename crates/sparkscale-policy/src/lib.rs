//! sparkscale-policy — turns one `ClusterObservation` into one
//! `ScalingDecision`.
//!
//! # Decision Algorithm
//!
//! ```text
//! present < 2                                   → NoOp (insufficient data)
//! workers == 0 && backlog > 0                   → ScaleUp (cold start, no cooldown)
//! lag absent                                    → NoOp (never scale up blind)
//! capacity absent                               → NoOp
//!
//! bpw      = total backlog / workers
//! pressure = share of the last K stages slower than the SLA (0 without history)
//!
//! bpw > upper && pressure > threshold && headroom < ceiling  → ScaleUp
//! bpw < lower && pressure == 0        && headroom > floor    → ScaleDown
//! otherwise                                                  → NoOp
//!
//! candidate != NoOp && now - last_action < cooldown          → NoOp
//! ```
//!
//! The engine performs no I/O and holds no state; cooldown state is owned
//! by the caller and passed in.

pub mod config;
pub mod engine;

pub use config::{PolicyConfig, PolicyConfigError};
pub use engine::ScalingPolicyEngine;
