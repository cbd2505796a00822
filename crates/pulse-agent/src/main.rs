//! Cloud Pulse agent
//!
//! Collects per-resource cloud metrics on a schedule, persists them through
//! the node service and flags anomalous points per (service, metric) group.

use anyhow::{Context, Result};
use pulse_agent::{
    api,
    config::{AgentConfig, DetectionMode},
};
use pulse_lib::{
    anomaly::AnomalyDetector,
    collector::HttpTelemetrySource,
    health::HealthRegistry,
    upstream::{
        CredentialProvider, DetectionService, EndpointRegistry, HttpAnomalyMonitor,
        HttpCredentialProvider, HttpDetectionService, HttpPersistenceSink, JsonClient,
        LocalDetectionService, StaticCredentialProvider,
    },
    Orchestrator, PulseMetrics, StartOutcome, StructuredLogger,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cloud-pulse agent");

    let config = AgentConfig::load()?;
    info!(
        instance = %config.instance_name,
        detection = %config.detection,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();

    // Registers the collector metrics before the first scrape
    let _metrics = PulseMetrics::new();

    let logger = StructuredLogger::new(&config.instance_name);
    logger.log_startup(AGENT_VERSION, &config.detection.to_string());

    let endpoints = EndpointRegistry::new(config.endpoints()?);
    let client = JsonClient::new().context("Failed to build HTTP client")?;

    let detection: Arc<dyn DetectionService> = match config.detection {
        DetectionMode::Local => Arc::new(LocalDetectionService::new(config.scorer())),
        DetectionMode::Remote => Arc::new(HttpDetectionService::new(
            client.clone(),
            endpoints.clone(),
        )),
    };

    let credentials: Arc<dyn CredentialProvider> = match config.static_credentials() {
        Some(creds) => Arc::new(StaticCredentialProvider::new(Some(creds))),
        None => Arc::new(HttpCredentialProvider::new(client.clone(), endpoints.clone())),
    };

    let orchestrator = Orchestrator::builder()
        .telemetry(Arc::new(HttpTelemetrySource::new(
            client.clone(),
            endpoints.clone(),
        )))
        .persistence(Arc::new(HttpPersistenceSink::new(
            client.clone(),
            endpoints.clone(),
        )))
        .detection(detection)
        .credentials(credentials)
        .monitor(Arc::new(HttpAnomalyMonitor::new(client, endpoints.clone())))
        .endpoints(endpoints)
        .settings(config.settings())
        .health(health_registry.clone())
        .logger(logger.clone())
        .build()
        .context("Failed to wire orchestrator")?;

    if config.auto_start && orchestrator.start().await == StartOutcome::AlreadyRunning {
        info!("Collection loop already running");
    }

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        orchestrator.clone(),
        AnomalyDetector::new(config.scorer()),
    ));

    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        served = api_handle => {
            let reason = match served {
                Ok(Ok(())) => "API server exited".to_string(),
                Ok(Err(e)) => format!("API server failed: {}", e),
                Err(e) => format!("API task failed: {}", e),
            };
            logger.log_shutdown(&reason);
        }
    }

    orchestrator.stop().await;
    info!("Shutting down");

    Ok(())
}
