//! Collaborators the orchestrator depends on
//!
//! Each external service sits behind an async trait so the orchestrator can
//! be wired with HTTP adapters in production and mocks in tests.

mod http;
mod local;

pub use http::{
    HttpAnomalyMonitor, HttpCredentialProvider, HttpDetectionService, HttpPersistenceSink,
    JsonClient, DEFAULT_REGION,
};
pub use local::{LocalDetectionService, StaticCredentialProvider};

use crate::anomaly::{DetectionRequest, DetectionResult};
use crate::error::{PulseError, Result};
use crate::models::{Credentials, MetricRecord, ServiceAlert};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use url::Url;

/// Collaborator labels used in errors and logs
pub mod names {
    pub const TELEMETRY: &str = "telemetry source";
    pub const PERSISTENCE: &str = "persistence sink";
    pub const DETECTION: &str = "detection service";
    pub const CREDENTIALS: &str = "credential provider";
    pub const MONITOR: &str = "anomaly monitor";
}

/// Durable storage for collected records
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn store(&self, records: &[MetricRecord]) -> Result<()>;
}

/// Runs anomaly detection on one grouped batch
#[async_trait]
pub trait DetectionService: Send + Sync {
    async fn detect(&self, request: &DetectionRequest) -> Result<DetectionResult>;
}

/// Supplies region and access credentials; `None` when none are configured
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> Result<Option<Credentials>>;
}

/// Aggregate anomaly monitoring across services
#[async_trait]
pub trait AnomalyMonitor: Send + Sync {
    async fn sweep(&self, services: &[String], alert_threshold: f64) -> Result<Vec<ServiceAlert>>;
}

/// Base URLs of the HTTP collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEndpoints {
    pub node_service_url: String,
    pub ai_service_url: String,
    pub telemetry_url: String,
}

impl ServiceEndpoints {
    pub fn new(
        node_service_url: &str,
        ai_service_url: &str,
        telemetry_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            node_service_url: validate_url(node_service_url)?,
            ai_service_url: validate_url(ai_service_url)?,
            telemetry_url: validate_url(telemetry_url)?,
        })
    }
}

/// Partial endpoint change; `None` leaves a URL untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointUpdate {
    #[serde(default)]
    pub node_service_url: Option<String>,
    #[serde(default)]
    pub ai_service_url: Option<String>,
    #[serde(default)]
    pub telemetry_url: Option<String>,
}

impl EndpointUpdate {
    pub fn is_empty(&self) -> bool {
        self.node_service_url.is_none()
            && self.ai_service_url.is_none()
            && self.telemetry_url.is_none()
    }
}

/// Shared, reconfigurable endpoint table read by every HTTP adapter
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    inner: Arc<RwLock<ServiceEndpoints>>,
}

impl EndpointRegistry {
    pub fn new(endpoints: ServiceEndpoints) -> Self {
        Self {
            inner: Arc::new(RwLock::new(endpoints)),
        }
    }

    pub fn snapshot(&self) -> ServiceEndpoints {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn node_service(&self) -> String {
        self.snapshot().node_service_url
    }

    pub fn ai_service(&self) -> String {
        self.snapshot().ai_service_url
    }

    pub fn telemetry(&self) -> String {
        self.snapshot().telemetry_url
    }

    /// Apply an update atomically; nothing changes if any URL is invalid
    pub fn apply(&self, update: &EndpointUpdate) -> Result<ServiceEndpoints> {
        let mut next = self.snapshot();
        if let Some(url) = &update.node_service_url {
            next.node_service_url = validate_url(url)?;
        }
        if let Some(url) = &update.ai_service_url {
            next.ai_service_url = validate_url(url)?;
        }
        if let Some(url) = &update.telemetry_url {
            next.telemetry_url = validate_url(url)?;
        }

        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = next.clone();
        Ok(next)
    }
}

/// Accept only absolute http(s) URLs; trailing slashes are dropped
pub fn validate_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw.trim())
        .map_err(|e| PulseError::Configuration(format!("invalid endpoint '{}': {}", raw, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PulseError::Configuration(format!(
            "endpoint '{}' must use http or https",
            raw
        )));
    }
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new(
            ServiceEndpoints::new(
                "http://node-service:3000",
                "http://ai-service:9000/",
                "http://telemetry-gateway:8600",
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_trailing_slash_is_dropped() {
        assert_eq!(registry().ai_service(), "http://ai-service:9000");
    }

    #[test]
    fn test_apply_updates_only_given_urls() {
        let registry = registry();
        let update = EndpointUpdate {
            ai_service_url: Some("https://ml.internal:9443".to_string()),
            ..Default::default()
        };
        let next = registry.apply(&update).unwrap();

        assert_eq!(next.ai_service_url, "https://ml.internal:9443");
        assert_eq!(registry.node_service(), "http://node-service:3000");
        assert_eq!(registry.ai_service(), "https://ml.internal:9443");
    }

    #[test]
    fn test_invalid_update_changes_nothing() {
        let registry = registry();
        let update = EndpointUpdate {
            node_service_url: Some("http://other:3000".to_string()),
            ai_service_url: Some("not a url".to_string()),
            ..Default::default()
        };

        let err = registry.apply(&update).unwrap_err();
        assert!(matches!(err, PulseError::Configuration(_)));
        assert_eq!(registry.node_service(), "http://node-service:3000");
    }

    #[test]
    fn test_non_http_scheme_rejected() {
        assert!(validate_url("ftp://files:21").is_err());
        assert!(EndpointUpdate::default().is_empty());
    }
}
