//! sparkscale-dispatch — delivers non-no-op decisions to the orchestrator.
//!
//! # Architecture
//!
//! ```text
//! ControlLoop ──submit──▶ DispatchQueue (depth-1 slot, newest wins)
//!                              │ background worker, one decision at a time
//!                              ▼
//!                      ScaleRequestDispatcher
//!                        ├── in-flight guard (atomic CAS on epoch)
//!                        ├── epoch ordering (never resend an older epoch)
//!                        └── RetryPolicy: transient → backoff and retry
//!                                         permanent → fail immediately
//!                              │
//!                              ▼
//!                      ScaleRequestSink (OrchestratorClient)
//! ```
//!
//! The control loop never waits on the worker. A decision queued while an
//! older one is still retrying replaces any decision waiting behind it, so
//! at most one request is outstanding and epochs reach the orchestrator in
//! increasing order.

pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod retry;

pub use dispatcher::{Ack, ScaleRequestDispatcher};
pub use error::DispatchError;
pub use queue::{DispatchQueue, DispatchStats};
pub use retry::RetryPolicy;
