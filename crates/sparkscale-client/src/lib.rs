//! sparkscale-client — HTTP clients for the three upstream services.
//!
//! Each client is a thin typed wrapper over a shared hyper HTTP/1
//! transport. The `signals` module adapts the read paths into
//! `SignalSource`s; `OrchestratorClient` also implements the write path
//! used by the dispatcher.
//!
//! # Architecture
//!
//! ```text
//! HttpClient (hyper http1, one connection per request, bounded by timeout)
//!   ├── KafkaManagerClient   GET  /api/status/{cluster}/topicIdentities
//!   ├── SparkMasterClient    GET  /json
//!   └── OrchestratorClient   GET  /spark-stage-history
//!                            POST /scale-spark-cluster
//!
//! signals
//!   ├── LagSignal      → LagObservation
//!   ├── CapacitySignal → CapacityObservation
//!   └── HistorySignal  → HistoryObservation
//! ```

pub mod dto;
pub mod error;
pub mod kafka;
pub mod orchestrator;
pub mod signals;
pub mod spark;
pub mod transport;

pub use dto::{ScaleAck, ScaleSparkClusterRequest, SparkStageHistory};
pub use error::{ClientError, TransportError};
pub use kafka::KafkaManagerClient;
pub use orchestrator::{OrchestratorClient, ScaleRequestSink};
pub use signals::{CapacitySignal, HistorySignal, LagSignal};
pub use spark::SparkMasterClient;
pub use transport::{HttpClient, HttpResponse, validate_header};
