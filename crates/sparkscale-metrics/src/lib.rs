//! sparkscale-metrics — gathers the three scaling signals into one
//! `ClusterObservation` per cycle.
//!
//! # Architecture
//!
//! ```text
//! MetricsAggregator::observe()
//!   ├── spawn LagSignal::fetch()       ┐
//!   ├── spawn CapacitySignal::fetch()  ├─ concurrent, each bounded by
//!   ├── spawn HistorySignal::fetch()   ┘  min(signal timeout, outer budget)
//!   └── ClusterObservation { lag, capacity, history } + per-signal event
//! ```
//!
//! `observe()` never fails. A source that errors, times out or panics is
//! recorded as absent with its reason, and the outcome is counted in
//! `AggregatorStats`.

pub mod aggregator;

pub use aggregator::{AggregatorConfig, AggregatorStats, MetricsAggregator, SignalCounts};
