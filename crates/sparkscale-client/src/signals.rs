//! `SignalSource` implementations backed by the upstream clients.
//!
//! Each source performs one request and converts the wire format into a
//! validated observation. Anything that breaks an invariant becomes a
//! `SignalError`, never a partially-filled observation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sparkscale_types::{
    CapacityObservation, Clock, HistoryObservation, LagObservation, PartitionOffsets, SignalError,
    SignalKind, SignalSource, StageRecord,
};

use crate::kafka::KafkaManagerClient;
use crate::orchestrator::OrchestratorClient;
use crate::spark::SparkMasterClient;

// ── Lag ───────────────────────────────────────────────────────────

/// Consumer backlog for a set of topics.
pub struct LagSignal {
    client: KafkaManagerClient,
    /// Topics to observe; empty means every reported topic.
    topics: BTreeSet<String>,
}

impl LagSignal {
    pub fn new(client: KafkaManagerClient, topics: impl IntoIterator<Item = String>) -> Self {
        Self {
            client,
            topics: topics.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SignalSource for LagSignal {
    type Output = LagObservation;

    fn kind(&self) -> SignalKind {
        SignalKind::Lag
    }

    async fn fetch(&self) -> Result<LagObservation, SignalError> {
        let resp = self.client.topic_identities().await?;

        // A configured topic missing from the response would undercount
        // backlog, which reads as "idle" and invites a scale-down.
        if let Some(missing) = self
            .topics
            .iter()
            .find(|t| !resp.topic_identities.iter().any(|ti| &ti.topic == *t))
        {
            return Err(SignalError::Unavailable(format!(
                "topic {missing} not reported by cluster {}",
                self.client.cluster_name()
            )));
        }

        let offsets = resp
            .topic_identities
            .into_iter()
            .filter(|ti| self.topics.is_empty() || self.topics.contains(&ti.topic))
            .flat_map(|ti| {
                let topic = ti.topic;
                ti.partitions_identity.into_iter().map(move |p| PartitionOffsets {
                    topic: topic.clone(),
                    partition: p.part_num,
                    latest_offset: p.latest_offset,
                    committed_offset: p.committed_offset,
                })
            });

        LagObservation::from_offsets(offsets)
    }
}

// ── Capacity ──────────────────────────────────────────────────────

/// Worker, core and memory inventory from the cluster master.
pub struct CapacitySignal {
    client: SparkMasterClient,
}

impl CapacitySignal {
    pub fn new(client: SparkMasterClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SignalSource for CapacitySignal {
    type Output = CapacityObservation;

    fn kind(&self) -> SignalKind {
        SignalKind::Capacity
    }

    async fn fetch(&self) -> Result<CapacityObservation, SignalError> {
        let doc = self.client.json().await?;

        // A standby master reports stale inventory.
        if let Some(status) = doc.status.as_deref()
            && !status.eq_ignore_ascii_case("ALIVE")
        {
            return Err(SignalError::Unavailable(format!("cluster master status is {status}")));
        }

        CapacityObservation::new(
            doc.aliveworkers,
            doc.cores,
            doc.coresused,
            doc.memory,
            doc.memoryused,
        )
    }
}

// ── History ───────────────────────────────────────────────────────

/// Recent stage executions from the orchestrator, trimmed to the
/// retention window.
pub struct HistorySignal {
    client: OrchestratorClient,
    limit: usize,
    max_age: Duration,
    clock: Arc<dyn Clock>,
}

impl HistorySignal {
    pub fn new(client: OrchestratorClient, limit: usize, max_age: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            client,
            limit,
            max_age,
            clock,
        }
    }
}

#[async_trait]
impl SignalSource for HistorySignal {
    type Output = HistoryObservation;

    fn kind(&self) -> SignalKind {
        SignalKind::History
    }

    async fn fetch(&self) -> Result<HistoryObservation, SignalError> {
        let stages = self.client.spark_stage_history(self.limit).await?;
        let records = stages
            .iter()
            .map(StageRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(HistoryObservation::new(records).retain_window(self.limit, self.max_age, self.clock.now_ms()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use crate::transport::HttpClient;
    use axum::Json;
    use axum::routing::get;
    use serde_json::{Value, json};
    use sparkscale_types::ManualClock;

    fn http(base: &str) -> HttpClient {
        HttpClient::new(base, Duration::from_secs(2)).unwrap()
    }

    async fn kafka_with(body: Value) -> KafkaManagerClient {
        let router = axum::Router::new().route(
            "/api/status/logs/topicIdentities",
            get(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        );
        KafkaManagerClient::new(http(&serve(router).await), "logs")
    }

    async fn master_with(body: Value) -> SparkMasterClient {
        let router = axum::Router::new().route(
            "/json",
            get(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        );
        SparkMasterClient::new(http(&serve(router).await))
    }

    fn identities() -> Value {
        json!({"topicIdentities": [
            {"topic": "topicA", "partitionsIdentity": [
                {"partNum": 0, "latestOffset": 800, "committedOffset": 300},
                {"partNum": 1, "latestOffset": 900, "committedOffset": 400}
            ]},
            {"topic": "topicB", "partitionsIdentity": [
                {"partNum": 0, "latestOffset": 10, "committedOffset": 10}
            ]},
            {"topic": "internal", "partitionsIdentity": [
                {"partNum": 0, "latestOffset": 99999, "committedOffset": 0}
            ]}
        ]})
    }

    #[tokio::test]
    async fn lag_signal_filters_to_configured_topics() {
        let signal = LagSignal::new(
            kafka_with(identities()).await,
            vec!["topicA".to_string(), "topicB".to_string()],
        );
        assert_eq!(signal.kind(), SignalKind::Lag);

        let lag = signal.fetch().await.unwrap();
        assert_eq!(lag.topic_backlog("topicA"), Some(1000));
        assert_eq!(lag.topic_backlog("topicB"), Some(0));
        assert_eq!(lag.topic_backlog("internal"), None);
        assert_eq!(lag.total_backlog(), 1000);
    }

    #[tokio::test]
    async fn lag_signal_without_filter_takes_everything() {
        let signal = LagSignal::new(kafka_with(identities()).await, Vec::new());
        let lag = signal.fetch().await.unwrap();
        assert_eq!(lag.total_backlog(), 1000 + 99999);
    }

    #[tokio::test]
    async fn lag_signal_missing_topic_is_unavailable() {
        let signal = LagSignal::new(kafka_with(identities()).await, vec!["topicC".to_string()]);
        let err = signal.fetch().await.unwrap_err();
        assert!(matches!(err, SignalError::Unavailable(msg) if msg.contains("topicC")));
    }

    #[tokio::test]
    async fn lag_signal_negative_backlog_is_policy_violation() {
        let body = json!({"topicIdentities": [
            {"topic": "topicA", "partitionsIdentity": [
                {"partNum": 0, "latestOffset": 10, "committedOffset": 50}
            ]}
        ]});
        let signal = LagSignal::new(kafka_with(body).await, Vec::new());
        assert!(matches!(signal.fetch().await, Err(SignalError::PolicyViolation(_))));
    }

    #[tokio::test]
    async fn capacity_signal_reads_inventory() {
        let body = json!({
            "aliveworkers": 4, "cores": 40, "coresused": 36,
            "memory": 1000, "memoryused": 500, "status": "ALIVE"
        });
        let signal = CapacitySignal::new(master_with(body).await);

        let cap = signal.fetch().await.unwrap();
        assert_eq!(cap.workers(), 4);
        assert!((cap.headroom_ratio() - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn capacity_signal_rejects_standby_master() {
        let body = json!({
            "aliveworkers": 0, "cores": 0, "coresused": 0,
            "memory": 0, "memoryused": 0, "status": "STANDBY"
        });
        let signal = CapacitySignal::new(master_with(body).await);
        assert!(matches!(signal.fetch().await, Err(SignalError::Unavailable(_))));
    }

    #[tokio::test]
    async fn capacity_signal_negative_values_are_policy_violation() {
        let body = json!({
            "aliveworkers": -2, "cores": 8, "coresused": 0,
            "memory": 100, "memoryused": 0
        });
        let signal = CapacitySignal::new(master_with(body).await);
        assert!(matches!(signal.fetch().await, Err(SignalError::PolicyViolation(_))));
    }

    #[tokio::test]
    async fn history_signal_applies_retention_window() {
        let router = axum::Router::new().route(
            "/spark-stage-history",
            get(|| async {
                Json(json!({"data": {"sparkStageHistory": [
                    {"stageId": 1, "submissionTime": 1_000, "completionTime": 2_000, "status": "COMPLETE"},
                    {"stageId": 2, "submissionTime": 50_000, "completionTime": 58_000, "status": "COMPLETE"},
                    {"stageId": 3, "submissionTime": 60_000, "completionTime": 90_000, "status": "FAILED"}
                ]}}))
            }),
        );
        let orchestrator = OrchestratorClient::new(http(&serve(router).await), Vec::new());
        let clock = Arc::new(ManualClock::new(100_000));
        let signal = HistorySignal::new(orchestrator, 10, Duration::from_secs(60), clock);

        let history = signal.fetch().await.unwrap();
        // Stage 1 ended 98s before "now" and falls outside the 60s window.
        let ids: Vec<_> = history.records().iter().map(|r| r.stage_id).collect();
        assert_eq!(ids, vec![Some(3), Some(2)]);
        assert!(!history.records()[0].succeeded);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_unavailable() {
        let client = KafkaManagerClient::new(
            HttpClient::new("http://127.0.0.1:1", Duration::from_millis(300)).unwrap(),
            "logs",
        );
        let signal = LagSignal::new(client, Vec::new());
        assert!(matches!(
            signal.fetch().await,
            Err(SignalError::Unavailable(_) | SignalError::Timeout(_))
        ));
    }
}
