//! sparkscale-control — the periodic observe → decide → dispatch cycle.
//!
//! # Lifecycle
//!
//! ```text
//!            tick                 observation           non-no-op
//!   Idle ──────────▶ Observing ─────────────▶ Deciding ──────────▶ Dispatching
//!    ▲                                          │ no-op                │ queued
//!    └──────────────────────────────────────────┴──────────────────────┘
//!
//!   shutdown (any state) ──▶ Stopped
//! ```
//!
//! The loop owns the cooldown state and the epoch counter. Dispatch is
//! handed to a `DispatchQueue` and never awaited, so a slow orchestrator
//! cannot delay the next tick.

pub mod controller;

pub use controller::{ControlLoop, CycleReport, LoopState};
