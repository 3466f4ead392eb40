//! Cluster master client.

use crate::dto::SparkMasterJsonResponse;
use crate::error::ClientError;
use crate::transport::HttpClient;

/// Reads the cluster master's status document.
#[derive(Debug, Clone)]
pub struct SparkMasterClient {
    http: HttpClient,
}

impl SparkMasterClient {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }

    /// `GET /json`
    pub async fn json(&self) -> Result<SparkMasterJsonResponse, ClientError> {
        self.http.get_json("/json", &[]).await
    }
}
