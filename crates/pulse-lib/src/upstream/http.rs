//! HTTP adapters for the external collaborators
//!
//! All adapters share one [`JsonClient`] and resolve their base URL from the
//! [`EndpointRegistry`] on every call, so reconfiguration applies at once.

use super::{
    names, AnomalyMonitor, CredentialProvider, DetectionService, EndpointRegistry,
    PersistenceSink,
};
use crate::anomaly::{DetectionRequest, DetectionResult};
use crate::error::{PulseError, Result};
use crate::models::{Credentials, MetricRecord, ServiceAlert};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Region assumed when the credential store does not name one
pub const DEFAULT_REGION: &str = "us-east-1";

/// Upper bound for any single HTTP exchange; callers apply tighter limits
const CLIENT_TIMEOUT: Duration = Duration::from_secs(120);

/// Thin JSON-over-HTTP client shared by the adapters
#[derive(Debug, Clone)]
pub struct JsonClient {
    client: Client,
}

impl JsonClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(CLIENT_TIMEOUT)
            .build()
            .map_err(|e| PulseError::Configuration(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// `base` joined with `path`, keeping any path prefix on the base
    pub fn endpoint(base: &str, path: &str) -> Result<Url> {
        let base = Url::parse(&format!("{}/", base.trim_end_matches('/')))
            .map_err(|e| PulseError::Configuration(format!("invalid base URL '{}': {}", base, e)))?;
        base.join(path.trim_start_matches('/'))
            .map_err(|e| PulseError::Configuration(format!("invalid path '{}': {}", path, e)))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        collaborator: &'static str,
    ) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| PulseError::upstream(collaborator, format!("request failed: {}", e)))
    }

    async fn reject(response: Response, collaborator: &'static str) -> PulseError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        PulseError::upstream(collaborator, format!("API error ({}): {}", status, body))
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        collaborator: &'static str,
    ) -> Result<T> {
        if !response.status().is_success() {
            return Err(Self::reject(response, collaborator).await);
        }
        response
            .json()
            .await
            .map_err(|e| PulseError::upstream(collaborator, format!("failed to parse response: {}", e)))
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
        collaborator: &'static str,
    ) -> Result<T> {
        let url = Self::endpoint(base, path)?;
        let response = self.send(self.client.get(url), collaborator).await?;
        Self::decode(response, collaborator).await
    }

    /// Make a GET request whose body may legitimately be empty or `null`
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        base: &str,
        path: &str,
        collaborator: &'static str,
    ) -> Result<Option<T>> {
        let url = Self::endpoint(base, path)?;
        let response = self.send(self.client.get(url), collaborator).await?;
        if !response.status().is_success() {
            return Err(Self::reject(response, collaborator).await);
        }
        let text = response
            .text()
            .await
            .map_err(|e| PulseError::upstream(collaborator, format!("failed to read body: {}", e)))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map_err(|e| PulseError::upstream(collaborator, format!("failed to parse response: {}", e)))
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        base: &str,
        path: &str,
        body: &B,
        collaborator: &'static str,
    ) -> Result<T> {
        let response = self.post_raw(base, path, body, collaborator).await?;
        Self::decode(response, collaborator).await
    }

    /// POST and hand back the raw response for status-only endpoints
    pub async fn post_raw<B: Serialize + ?Sized>(
        &self,
        base: &str,
        path: &str,
        body: &B,
        collaborator: &'static str,
    ) -> Result<Response> {
        let url = Self::endpoint(base, path)?;
        self.send(self.client.post(url).json(body), collaborator)
            .await
    }
}

/// Stores batches through the node service's metrics-history API
pub struct HttpPersistenceSink {
    client: JsonClient,
    endpoints: EndpointRegistry,
}

impl HttpPersistenceSink {
    pub fn new(client: JsonClient, endpoints: EndpointRegistry) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl PersistenceSink for HttpPersistenceSink {
    async fn store(&self, records: &[MetricRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post_raw(
                &self.endpoints.node_service(),
                "/api/metrics-history/store",
                records,
                names::PERSISTENCE,
            )
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                debug!(records = records.len(), "Stored metrics batch");
                Ok(())
            }
            _ => Err(JsonClient::reject(response, names::PERSISTENCE).await),
        }
    }
}

/// Credential document as the node service returns it
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialDocument {
    #[serde(default, alias = "aws_access_key_id")]
    access_key_id: Option<String>,
    #[serde(default, alias = "aws_secret_access_key")]
    secret_access_key: Option<String>,
    #[serde(default, alias = "aws_default_region")]
    region: Option<String>,
}

impl CredentialDocument {
    fn into_credentials(self) -> Option<Credentials> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Some(Credentials {
            access_key_id: present(self.access_key_id)?,
            secret_access_key: present(self.secret_access_key)?,
            region: present(self.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
        })
    }
}

/// Reads credentials from the node service's credential store
pub struct HttpCredentialProvider {
    client: JsonClient,
    endpoints: EndpointRegistry,
}

impl HttpCredentialProvider {
    pub fn new(client: JsonClient, endpoints: EndpointRegistry) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn credentials(&self) -> Result<Option<Credentials>> {
        let document: Option<CredentialDocument> = self
            .client
            .get_optional(
                &self.endpoints.node_service(),
                "/api/aws-credentials",
                names::CREDENTIALS,
            )
            .await?;
        Ok(document.and_then(CredentialDocument::into_credentials))
    }
}

/// Remote detection responses may come bare or wrapped in `results`
#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionEnvelope {
    Wrapped { results: DetectionResult },
    Bare(DetectionResult),
}

/// Delegates detection to the AI service
pub struct HttpDetectionService {
    client: JsonClient,
    endpoints: EndpointRegistry,
}

impl HttpDetectionService {
    pub fn new(client: JsonClient, endpoints: EndpointRegistry) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl DetectionService for HttpDetectionService {
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionResult> {
        let envelope: DetectionEnvelope = self
            .client
            .post(
                &self.endpoints.ai_service(),
                "/api/detect-anomalies",
                request,
                names::DETECTION,
            )
            .await?;
        Ok(match envelope {
            DetectionEnvelope::Wrapped { results } => results,
            DetectionEnvelope::Bare(result) => result,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SweepRequest<'a> {
    services: &'a [String],
    alert_threshold: f64,
}

#[derive(Deserialize)]
struct SweepResponse {
    #[serde(default)]
    alerts: Vec<ServiceAlert>,
}

/// Cross-service sweep through the AI service's monitoring endpoint
pub struct HttpAnomalyMonitor {
    client: JsonClient,
    endpoints: EndpointRegistry,
}

impl HttpAnomalyMonitor {
    pub fn new(client: JsonClient, endpoints: EndpointRegistry) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl AnomalyMonitor for HttpAnomalyMonitor {
    async fn sweep(&self, services: &[String], alert_threshold: f64) -> Result<Vec<ServiceAlert>> {
        let response: SweepResponse = self
            .client
            .post(
                &self.endpoints.ai_service(),
                "/api/monitor-anomalies",
                &SweepRequest {
                    services,
                    alert_threshold,
                },
                names::MONITOR,
            )
            .await?;
        Ok(response.alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::features::tests::series;
    use crate::upstream::ServiceEndpoints;

    fn registry(url: &str) -> EndpointRegistry {
        EndpointRegistry::new(ServiceEndpoints::new(url, url, url).unwrap())
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let url = JsonClient::endpoint("http://gw:8600/v1", "/resources/compute").unwrap();
        assert_eq!(url.as_str(), "http://gw:8600/v1/resources/compute");

        let url = JsonClient::endpoint("http://node:3000/", "api/aws-credentials").unwrap();
        assert_eq!(url.as_str(), "http://node:3000/api/aws-credentials");
    }

    #[tokio::test]
    async fn test_store_accepts_created() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/metrics-history/store")
            .match_header("content-type", "application/json")
            .with_status(201)
            .create_async()
            .await;

        let sink = HttpPersistenceSink::new(JsonClient::new().unwrap(), registry(&server.url()));
        sink.store(&series(&[1.0, 2.0])).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_store_rejects_other_statuses() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/metrics-history/store")
            .with_status(202)
            .with_body("queued")
            .create_async()
            .await;

        let sink = HttpPersistenceSink::new(JsonClient::new().unwrap(), registry(&server.url()));
        let err = sink.store(&series(&[1.0])).await.unwrap_err();
        assert!(matches!(
            err,
            PulseError::Upstream {
                collaborator: names::PERSISTENCE,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_store_skips_empty_batch() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/metrics-history/store")
            .expect(0)
            .create_async()
            .await;

        let sink = HttpPersistenceSink::new(JsonClient::new().unwrap(), registry(&server.url()));
        sink.store(&[]).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_credentials_from_store_format() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/aws-credentials")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"aws_access_key_id":"AKIA1","aws_secret_access_key":"s3cret"}"#)
            .create_async()
            .await;

        let provider =
            HttpCredentialProvider::new(JsonClient::new().unwrap(), registry(&server.url()));
        let creds = provider.credentials().await.unwrap().unwrap();
        assert_eq!(creds.access_key_id, "AKIA1");
        assert_eq!(creds.region, DEFAULT_REGION);
    }

    #[tokio::test]
    async fn test_null_or_partial_credentials_are_absent() {
        for body in ["null", "", r#"{"accessKeyId":"AKIA1"}"#] {
            let mut server = mockito::Server::new_async().await;
            let _mock = server
                .mock("GET", "/api/aws-credentials")
                .with_status(200)
                .with_body(body)
                .create_async()
                .await;

            let provider =
                HttpCredentialProvider::new(JsonClient::new().unwrap(), registry(&server.url()));
            assert_eq!(provider.credentials().await.unwrap(), None, "body {:?}", body);
        }
    }

    #[tokio::test]
    async fn test_detection_accepts_wrapped_results() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/detect-anomalies")
            .with_status(200)
            .with_body(
                r#"{"success": true, "results": {"anomalies": [
                    {"index": 5, "timestamp": "2024-03-04T08:25:00Z", "metric_value": 500.0,
                     "anomaly_score": 1.0, "z_score": 3.0, "rolling_mean": 90.9,
                     "deviation_percent": 450.0}
                ], "anomaly_count": 1, "total_points": 11, "anomaly_rate": 0.0909}}"#,
            )
            .create_async()
            .await;

        let service =
            HttpDetectionService::new(JsonClient::new().unwrap(), registry(&server.url()));
        let result = service
            .detect(&DetectionRequest::ensemble(series(&[50.0; 11])))
            .await
            .unwrap();
        assert_eq!(result.anomaly_count, 1);
        assert_eq!(result.anomalies[0].index, 5);
        assert_eq!(result.anomalies[0].anomaly_score, 1.0);
    }

    #[tokio::test]
    async fn test_detection_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/detect-anomalies")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let service =
            HttpDetectionService::new(JsonClient::new().unwrap(), registry(&server.url()));
        let err = service
            .detect(&DetectionRequest::ensemble(vec![]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_sweep_request_and_alerts() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/monitor-anomalies")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "services": ["ec2", "rds"],
                "alertThreshold": 0.8
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "alerts": [{"service": "ec2", "anomalies": [], "severity": "high", "count": 0}]}"#)
            .create_async()
            .await;

        let monitor = HttpAnomalyMonitor::new(JsonClient::new().unwrap(), registry(&server.url()));
        let alerts = monitor
            .sweep(&["ec2".to_string(), "rds".to_string()], 0.8)
            .await
            .unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].service, "ec2");
    }
}
