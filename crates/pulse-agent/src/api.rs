//! HTTP API: collector control, in-process detection, health and Prometheus metrics

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use pulse_lib::{
    anomaly::{AnomalyDetector, DetectionRequest, DetectionResult},
    health::{ComponentStatus, HealthRegistry},
    orchestrator::ConfigureRequest,
    CycleOutcome, Orchestrator, PulseError, StartOutcome, TriggerOutcome,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub orchestrator: Orchestrator,
    pub detector: AnomalyDetector,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        orchestrator: Orchestrator,
        detector: AnomalyDetector,
    ) -> Self {
        Self {
            health_registry,
            orchestrator,
            detector,
        }
    }
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn start_collector(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = match state.orchestrator.start().await {
        StartOutcome::Started => "started",
        StartOutcome::AlreadyRunning => "running",
    };
    Json(json!({ "status": status }))
}

async fn stop_collector(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.orchestrator.stop().await;
    Json(json!({ "status": "stopped" }))
}

async fn collector_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.orchestrator.status().await)
}

/// Run one cycle now: 200 on completion, 500 on failure, 409 if one is in flight
async fn collect_now(State(state): State<Arc<AppState>>) -> Response {
    let outcome = match state.orchestrator.trigger_now().await {
        TriggerOutcome::Ran(outcome) => outcome,
        TriggerOutcome::AlreadyInProgress => {
            return error_body(StatusCode::CONFLICT, "collection already in progress");
        }
    };

    let statistics = state.orchestrator.stats();
    let status_code = match &outcome {
        CycleOutcome::Completed { .. } => StatusCode::OK,
        CycleOutcome::StoreFailed { .. } | CycleOutcome::Failed { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        status_code,
        Json(json!({ "outcome": outcome, "statistics": statistics })),
    )
        .into_response()
}

async fn configure_collector(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConfigureRequest>,
) -> Response {
    match state.orchestrator.configure(&request).await {
        Ok(status) => {
            info!(?request, "Collector reconfigured");
            Json(json!({ "status": "configured", "configuration": status })).into_response()
        }
        Err(e @ PulseError::Configuration(_)) => error_body(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Detection runs on the blocking pool; the forest fit is CPU bound
async fn detect(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DetectionRequest>,
) -> Response {
    let detector = state.detector.clone();
    let total = request.metrics_data.len();
    let result = tokio::task::spawn_blocking(move || detector.detect(&request))
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "Detection task failed");
            DetectionResult::failure(total, e.to_string())
        });

    let status_code = if result.is_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status_code, Json(result)).into_response()
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/collector/start", post(start_collector))
        .route("/collector/stop", post(stop_collector))
        .route("/collector/status", get(collector_status))
        .route("/collector/collect-now", post(collect_now))
        .route("/collector/configure", post(configure_collector))
        .route("/detect", post(detect))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
