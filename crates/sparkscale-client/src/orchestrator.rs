//! Orchestration service client: stage history reads and scale requests.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::dto::{GetSparkStageHistoryResponse, ScaleAck, ScaleSparkClusterRequest, SparkStageHistory};
use crate::error::ClientError;
use crate::transport::HttpClient;

/// Write path for scaling requests.
///
/// Implementations perform a single submission; retry policy belongs to
/// the dispatcher.
#[async_trait]
pub trait ScaleRequestSink: Send + Sync {
    async fn submit(&self, request: &ScaleSparkClusterRequest) -> Result<ScaleAck, ClientError>;
}

/// Client for the orchestration service.
///
/// `headers` are sent on every request (tenant, auth, ...).
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    http: HttpClient,
    headers: Vec<(String, String)>,
}

impl OrchestratorClient {
    pub fn new(http: HttpClient, headers: Vec<(String, String)>) -> Self {
        Self { http, headers }
    }

    /// `GET /spark-stage-history?limit={limit}`
    pub async fn spark_stage_history(&self, limit: usize) -> Result<Vec<SparkStageHistory>, ClientError> {
        let path = format!("/spark-stage-history?limit={limit}");
        let resp: GetSparkStageHistoryResponse = self.http.get_json(&path, &self.headers).await?;
        debug!(
            stages = resp.data.spark_stage_history.len(),
            limit, "fetched stage history"
        );
        Ok(resp.data.spark_stage_history)
    }

    /// `POST /scale-spark-cluster`
    ///
    /// A 2xx response whose body is not a JSON object is still a success:
    /// the orchestrator accepted the request, so it must not be resent.
    pub async fn post_scale_spark_cluster(
        &self,
        request: &ScaleSparkClusterRequest,
    ) -> Result<ScaleAck, ClientError> {
        let resp = self
            .http
            .post_json("/scale-spark-cluster", &self.headers, request)
            .await?;
        resp.ensure_success()?;

        if resp.body.is_empty() {
            return Ok(ScaleAck::new());
        }
        match serde_json::from_slice::<ScaleAck>(&resp.body) {
            Ok(ack) => Ok(ack),
            Err(e) => {
                warn!(error = %e, status = %resp.status, "scale request accepted with unreadable acknowledgement");
                Ok(ScaleAck::new())
            }
        }
    }
}

#[async_trait]
impl ScaleRequestSink for OrchestratorClient {
    async fn submit(&self, request: &ScaleSparkClusterRequest) -> Result<ScaleAck, ClientError> {
        self.post_scale_spark_cluster(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::test_support::serve;
    use axum::Json;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn client(base: &str) -> OrchestratorClient {
        OrchestratorClient::new(
            HttpClient::new(base, Duration::from_secs(2)).unwrap(),
            vec![("X-Tenant-Name".to_string(), "acme".to_string())],
        )
    }

    #[tokio::test]
    async fn reads_stage_history_with_limit_and_headers() {
        let router = axum::Router::new().route(
            "/spark-stage-history",
            get(|Query(q): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                assert_eq!(q.get("limit").map(String::as_str), Some("5"));
                assert_eq!(headers.get("x-tenant-name").unwrap(), "acme");
                Json(json!({"data": {"sparkStageHistory": [
                    {"submissionTime": 1, "completionTime": 2, "status": "COMPLETE"}
                ]}}))
            }),
        );
        let base = serve(router).await;

        let stages = client(&base).spark_stage_history(5).await.unwrap();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].completion_time, 2);
    }

    #[tokio::test]
    async fn posts_scale_request_and_returns_ack() {
        let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
        let router = axum::Router::new()
            .route(
                "/scale-spark-cluster",
                post(|State(seen): State<Arc<Mutex<Vec<Value>>>>, Json(body): Json<Value>| async move {
                    seen.lock().unwrap().push(body);
                    Json(json!({"status": "accepted", "workers": 6}))
                }),
            )
            .with_state(seen.clone());
        let base = serve(router).await;

        let req = ScaleSparkClusterRequest {
            enable_up_scale: true,
            enable_down_scale: false,
            spark_stage_history: vec![],
        };
        let ack = client(&base).submit(&req).await.unwrap();

        assert_eq!(ack.get("status"), Some(&json!("accepted")));
        let bodies = seen.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["enableUpScale"], true);
        assert_eq!(bodies[0]["enableDownScale"], false);
    }

    #[tokio::test]
    async fn client_error_is_permanent() {
        let router = axum::Router::new().route(
            "/scale-spark-cluster",
            post(|| async { (StatusCode::BAD_REQUEST, "both flags set") }),
        );
        let base = serve(router).await;

        let req = ScaleSparkClusterRequest {
            enable_up_scale: true,
            enable_down_scale: false,
            spark_stage_history: vec![],
        };
        let err = client(&base).submit(&req).await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn accepted_without_json_body_is_success() {
        let router = axum::Router::new().route("/scale-spark-cluster", post(|| async { "ok" }));
        let base = serve(router).await;

        let req = ScaleSparkClusterRequest {
            enable_up_scale: false,
            enable_down_scale: true,
            spark_stage_history: vec![],
        };
        let ack = client(&base).submit(&req).await.unwrap();
        assert!(ack.is_empty());
    }
}
