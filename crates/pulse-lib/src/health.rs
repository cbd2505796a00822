//! Collector health model
//!
//! Each collaborator a cycle touches is one [`Component`]. The orchestrator
//! reports the outcome of every call against it; the agent API turns the
//! aggregate into liveness and readiness answers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Parts of the collection pipeline with their own health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Session with the telemetry source
    Telemetry,
    /// Per-category sub-collectors
    Collector,
    /// Persistence sink
    Persistence,
    /// Detection service
    Detector,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::Telemetry,
        Component::Collector,
        Component::Persistence,
        Component::Detector,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Telemetry => "telemetry",
            Component::Collector => "collector",
            Component::Persistence => "persistence",
            Component::Detector => "detector",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst so the aggregate is a `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Partial failure, e.g. one sub-collector or one detection group
    Degraded,
    Unhealthy,
}

/// Last reported state of one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the component entered its current status
    pub since: DateTime<Utc>,
    /// Failed reports in a row; reset by a healthy report
    pub consecutive_failures: u32,
}

impl ComponentHealth {
    fn healthy(at: DateTime<Utc>) -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            since: at,
            consecutive_failures: 0,
        }
    }

    fn apply(&mut self, status: ComponentStatus, message: Option<String>, at: DateTime<Utc>) {
        if status != self.status {
            self.since = at;
        }
        self.consecutive_failures = match status {
            ComponentStatus::Healthy => 0,
            _ => self.consecutive_failures.saturating_add(1),
        };
        self.status = status;
        self.message = message;
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<Component, ComponentHealth>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct HealthState {
    components: BTreeMap<Component, ComponentHealth>,
    wired: bool,
}

/// Shared health table, updated by the orchestrator and read by the API
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every component starts healthy; readiness waits for [`set_ready`](Self::set_ready)
    pub fn new() -> Self {
        let now = Utc::now();
        let components = Component::ALL
            .iter()
            .map(|c| (*c, ComponentHealth::healthy(now)))
            .collect();
        Self {
            state: Arc::new(RwLock::new(HealthState {
                components,
                wired: false,
            })),
        }
    }

    async fn report(&self, component: Component, status: ComponentStatus, message: Option<String>) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        state
            .components
            .entry(component)
            .or_insert_with(|| ComponentHealth::healthy(now))
            .apply(status, message, now);
    }

    pub async fn set_healthy(&self, component: Component) {
        self.report(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Mark the collaborators as wired
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.wired = ready;
    }

    pub async fn status_of(&self, component: Component) -> ComponentStatus {
        self.state
            .read()
            .await
            .components
            .get(&component)
            .map(|h| h.status)
            .unwrap_or(ComponentStatus::Healthy)
    }

    pub async fn component(&self, component: Component) -> Option<ComponentHealth> {
        self.state.read().await.components.get(&component).cloned()
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = state
            .components
            .values()
            .map(|h| h.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        HealthResponse {
            status,
            components: state.components.clone(),
        }
    }

    /// Ready once wired, unless a component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.wired {
            return ReadinessResponse {
                ready: false,
                reason: Some("collector not yet wired".to_string()),
            };
        }

        let failing: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, h)| h.status == ComponentStatus::Unhealthy)
            .map(|(c, _)| c.as_str())
            .collect();
        if failing.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("unhealthy: {}", failing.join(", "))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_all_components_start_healthy() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components.len(), 4);
        assert!(health
            .components
            .values()
            .all(|h| h.consecutive_failures == 0));
    }

    #[tokio::test]
    async fn test_aggregate_is_worst_component() {
        let registry = HealthRegistry::new();

        registry
            .set_degraded(Component::Collector, "failed collectors: rds")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry
            .set_unhealthy(Component::Persistence, "store returned 503")
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Unhealthy);

        registry.set_healthy(Component::Persistence).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);
    }

    #[tokio::test]
    async fn test_failures_count_until_recovery() {
        let registry = HealthRegistry::new();

        registry.set_unhealthy(Component::Telemetry, "refused").await;
        let first = registry.component(Component::Telemetry).await.unwrap();
        registry.set_unhealthy(Component::Telemetry, "refused again").await;
        let second = registry.component(Component::Telemetry).await.unwrap();

        assert_eq!(second.consecutive_failures, 2);
        assert_eq!(second.since, first.since);
        assert_eq!(second.message.as_deref(), Some("refused again"));

        registry.set_healthy(Component::Telemetry).await;
        let recovered = registry.component(Component::Telemetry).await.unwrap();
        assert_eq!(recovered.consecutive_failures, 0);
        assert!(recovered.message.is_none());
        assert!(recovered.since >= second.since);
    }

    #[tokio::test]
    async fn test_readiness_waits_for_wiring() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert!(readiness.reason.unwrap().contains("not yet wired"));

        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_names_unhealthy_components() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;
        registry.set_unhealthy(Component::Persistence, "unreachable").await;
        registry.set_degraded(Component::Detector, "ec2/CPUUtilization").await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("unhealthy: persistence"));
    }

    #[test]
    fn test_response_keys_are_component_names() {
        let mut components = BTreeMap::new();
        components.insert(Component::Detector, ComponentHealth::healthy(Utc::now()));
        let json = serde_json::to_value(HealthResponse {
            status: ComponentStatus::Healthy,
            components,
        })
        .unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["components"]["detector"]["consecutiveFailures"], 0);
    }
}
