//! Wire formats for the upstream services.
//!
//! Numeric fields are signed and only validated when converted into the
//! domain types, so a negative value from upstream surfaces as a
//! `PolicyViolation` instead of a decode error.

use serde::{Deserialize, Serialize};

use sparkscale_types::{HistoryObservation, ScaleAction, SignalError, StageRecord};

/// Acknowledgement returned by the orchestrator's write path.
pub type ScaleAck = serde_json::Map<String, serde_json::Value>;

// ── Broker manager ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicIdentitiesResponse {
    #[serde(default)]
    pub topic_identities: Vec<TopicIdentity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicIdentity {
    pub topic: String,
    #[serde(default)]
    pub partitions_identity: Vec<PartitionIdentity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionIdentity {
    pub part_num: i64,
    pub latest_offset: i64,
    pub committed_offset: i64,
}

// ── Cluster master ────────────────────────────────────────────────

/// The cluster master's `/json` status document (memory in MB).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparkMasterJsonResponse {
    #[serde(default)]
    pub url: Option<String>,
    pub aliveworkers: i64,
    pub cores: i64,
    pub coresused: i64,
    pub memory: i64,
    pub memoryused: i64,
    #[serde(default)]
    pub status: Option<String>,
}

// ── Orchestrator ──────────────────────────────────────────────────

/// One stage execution as the orchestrator reports and accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SparkStageHistory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<u64>,
    /// Epoch milliseconds.
    pub submission_time: i64,
    /// Epoch milliseconds.
    pub completion_time: i64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_records: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cores_used: Option<u32>,
}

impl SparkStageHistory {
    const SUCCEEDED: &'static str = "COMPLETE";
    const FAILED: &'static str = "FAILED";

    fn is_success_status(status: &str) -> bool {
        matches!(
            status.to_ascii_uppercase().as_str(),
            "COMPLETE" | "COMPLETED" | "SUCCEEDED" | "SUCCESS"
        )
    }
}

impl TryFrom<&SparkStageHistory> for StageRecord {
    type Error = SignalError;

    fn try_from(dto: &SparkStageHistory) -> Result<Self, Self::Error> {
        let mut record = StageRecord::new(
            dto.submission_time,
            dto.completion_time,
            SparkStageHistory::is_success_status(&dto.status),
        )?;
        record.stage_id = dto.stage_id;
        record.input_records = dto.input_records;
        record.cores_used = dto.cores_used;
        Ok(record)
    }
}

impl From<&StageRecord> for SparkStageHistory {
    fn from(record: &StageRecord) -> Self {
        Self {
            stage_id: record.stage_id,
            submission_time: record.started_at as i64,
            completion_time: record.ended_at as i64,
            status: if record.succeeded {
                SparkStageHistory::SUCCEEDED
            } else {
                SparkStageHistory::FAILED
            }
            .to_string(),
            input_records: record.input_records,
            cores_used: record.cores_used,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetSparkStageHistoryResponse {
    #[serde(default)]
    pub data: StageHistoryData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageHistoryData {
    #[serde(default)]
    pub spark_stage_history: Vec<SparkStageHistory>,
}

/// Body of `POST /scale-spark-cluster`.
///
/// Exactly one flag is true; the history is the snapshot that justified
/// the decision so the orchestrator can corroborate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSparkClusterRequest {
    pub enable_up_scale: bool,
    pub enable_down_scale: bool,
    pub spark_stage_history: Vec<SparkStageHistory>,
}

impl ScaleSparkClusterRequest {
    /// Build the request for `action`; `None` for `NoOp`.
    pub fn for_action(action: ScaleAction, history: Option<&HistoryObservation>) -> Option<Self> {
        let (up, down) = match action {
            ScaleAction::ScaleUp => (true, false),
            ScaleAction::ScaleDown => (false, true),
            ScaleAction::NoOp => return None,
        };
        Some(Self {
            enable_up_scale: up,
            enable_down_scale: down,
            spark_stage_history: history
                .map(|h| h.records().iter().map(SparkStageHistory::from).collect())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage_history_parses_camel_case() {
        let body = json!({
            "data": {
                "sparkStageHistory": [
                    {"stageId": 7, "submissionTime": 1000, "completionTime": 4000, "status": "COMPLETE", "inputRecords": 120},
                    {"submissionTime": 5000, "completionTime": 5500, "status": "FAILED"}
                ]
            }
        });
        let resp: GetSparkStageHistoryResponse = serde_json::from_value(body).unwrap();
        let stages = &resp.data.spark_stage_history;
        assert_eq!(stages.len(), 2);

        let first = StageRecord::try_from(&stages[0]).unwrap();
        assert_eq!(first.stage_id, Some(7));
        assert!(first.succeeded);
        assert_eq!(first.input_records, Some(120));

        let second = StageRecord::try_from(&stages[1]).unwrap();
        assert!(!second.succeeded);
    }

    #[test]
    fn inverted_stage_is_policy_violation() {
        let dto = SparkStageHistory {
            stage_id: None,
            submission_time: 10,
            completion_time: 5,
            status: "COMPLETE".into(),
            input_records: None,
            cores_used: None,
        };
        assert!(matches!(
            StageRecord::try_from(&dto),
            Err(SignalError::PolicyViolation(_))
        ));
    }

    #[test]
    fn scale_up_request_wire_format() {
        let history = HistoryObservation::new(vec![StageRecord::new(1000, 2000, true).unwrap().with_stage_id(3)]);
        let req = ScaleSparkClusterRequest::for_action(ScaleAction::ScaleUp, Some(&history)).unwrap();

        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "enableUpScale": true,
                "enableDownScale": false,
                "sparkStageHistory": [
                    {"stageId": 3, "submissionTime": 1000, "completionTime": 2000, "status": "COMPLETE"}
                ]
            })
        );
    }

    #[test]
    fn no_op_builds_no_request() {
        assert!(ScaleSparkClusterRequest::for_action(ScaleAction::NoOp, None).is_none());
        let down = ScaleSparkClusterRequest::for_action(ScaleAction::ScaleDown, None).unwrap();
        assert!(!down.enable_up_scale && down.enable_down_scale);
        assert!(down.spark_stage_history.is_empty());
    }

    #[test]
    fn spark_master_status_document() {
        let doc = json!({
            "url": "spark://master:7077",
            "aliveworkers": 4, "cores": 32, "coresused": 24,
            "memory": 65536, "memoryused": 40000,
            "status": "ALIVE", "workers": []
        });
        let resp: SparkMasterJsonResponse = serde_json::from_value(doc).unwrap();
        assert_eq!(resp.aliveworkers, 4);
        assert_eq!(resp.status.as_deref(), Some("ALIVE"));
    }
}
