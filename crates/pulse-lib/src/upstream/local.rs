//! In-process collaborator implementations

use super::{CredentialProvider, DetectionService};
use crate::anomaly::{AnomalyDetector, DetectionRequest, DetectionResult, ScorerConfig};
use crate::error::Result;
use crate::models::Credentials;
use async_trait::async_trait;
use tracing::warn;

/// Runs the detection pipeline inside the process
#[derive(Debug, Clone, Default)]
pub struct LocalDetectionService {
    detector: AnomalyDetector,
}

impl LocalDetectionService {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            detector: AnomalyDetector::new(config),
        }
    }
}

#[async_trait]
impl DetectionService for LocalDetectionService {
    /// Fitting runs on the blocking pool so callers' timeouts can elapse
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionResult> {
        let detector = self.detector.clone();
        let request = request.clone();
        let total = request.metrics_data.len();
        let result = tokio::task::spawn_blocking(move || detector.detect(&request))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Detection task failed");
                DetectionResult::failure(total, e.to_string())
            });
        Ok(result)
    }
}

/// Credentials fixed at startup, typically from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialProvider {
    credentials: Option<Credentials>,
}

impl StaticCredentialProvider {
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credentials(&self) -> Result<Option<Credentials>> {
        Ok(self.credentials.clone())
    }
}
