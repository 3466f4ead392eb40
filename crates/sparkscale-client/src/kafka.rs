//! Message-broker manager client.

use tracing::debug;

use crate::dto::TopicIdentitiesResponse;
use crate::error::ClientError;
use crate::transport::HttpClient;

/// Reads per-partition offsets for one broker cluster.
#[derive(Debug, Clone)]
pub struct KafkaManagerClient {
    http: HttpClient,
    cluster_name: String,
}

impl KafkaManagerClient {
    pub fn new(http: HttpClient, cluster_name: impl Into<String>) -> Self {
        Self {
            http,
            cluster_name: cluster_name.into(),
        }
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// `GET /api/status/{clusterName}/topicIdentities`
    pub async fn topic_identities(&self) -> Result<TopicIdentitiesResponse, ClientError> {
        let path = format!("/api/status/{}/topicIdentities", self.cluster_name);
        let resp: TopicIdentitiesResponse = self.http.get_json(&path, &[]).await?;
        debug!(
            cluster = %self.cluster_name,
            topics = resp.topic_identities.len(),
            "fetched topic identities"
        );
        Ok(resp)
    }
}
