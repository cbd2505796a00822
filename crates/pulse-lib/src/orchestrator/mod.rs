//! Collection orchestration
//!
//! The [`Orchestrator`] drives repeated collect, store and detect cycles on a
//! spawned tokio task, runs the cross-service anomaly sweep on its own
//! interval, and exposes start/stop/trigger/status/configure to callers.

mod cycle;
mod schedule;
mod stats;

pub use cycle::CycleOutcome;
pub use schedule::{JobSchedule, MAX_DELAY};
pub use stats::{CyclePhase, CycleStats, StatsHandle};

use crate::anomaly::{Alerter, AnomalyAlert};
use crate::collector::{default_collectors, ResourceCollector, TelemetrySource};
use crate::error::{PulseError, Result};
use crate::health::HealthRegistry;
use crate::observability::{PulseMetrics, StructuredLogger};
use crate::upstream::{
    AnomalyMonitor, CredentialProvider, DetectionService, EndpointRegistry, EndpointUpdate,
    PersistenceSink, ServiceEndpoints,
};
use chrono::{DateTime, Utc};
use cycle::SessionState;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Services the sweep asks the anomaly monitor about
pub const SWEEP_SERVICES: [&str; 4] = ["ec2", "rds", "lambda", "s3"];

/// Upper bound on collection and sweep intervals (one week)
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Interval for a minute count within `1..=MAX_INTERVAL_MINUTES`
pub fn interval_from_minutes(field: &str, minutes: u64) -> Result<Duration> {
    if !(1..=MAX_INTERVAL_MINUTES).contains(&minutes) {
        return Err(PulseError::Configuration(format!(
            "{} must be between 1 and {}",
            field, MAX_INTERVAL_MINUTES
        )));
    }
    minutes
        .checked_mul(60)
        .map(Duration::from_secs)
        .ok_or_else(|| PulseError::Configuration(format!("{} is out of range", field)))
}

/// Timing and threshold settings; intervals may change at runtime
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub collection_interval: Duration,
    pub sweep_interval: Duration,
    /// Loop polling resolution; bounds stop latency
    pub tick: Duration,
    pub lookback: Duration,
    pub collector_timeout: Duration,
    pub store_timeout: Duration,
    pub detect_timeout: Duration,
    pub sweep_timeout: Duration,
    pub alert_threshold: f64,
    pub sweep_services: Vec<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(15 * 60),
            tick: Duration::from_secs(60),
            lookback: Duration::from_secs(15 * 60),
            collector_timeout: Duration::from_secs(60),
            store_timeout: Duration::from_secs(30),
            detect_timeout: Duration::from_secs(60),
            sweep_timeout: Duration::from_secs(120),
            alert_threshold: 0.8,
            sweep_services: SWEEP_SERVICES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Result of a manual trigger
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Ran(CycleOutcome),
    AlreadyInProgress,
}

/// Runtime reconfiguration; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    #[serde(default)]
    pub collection_interval_minutes: Option<u64>,
    #[serde(default)]
    pub anomaly_check_interval_minutes: Option<u64>,
    #[serde(default)]
    pub node_service_url: Option<String>,
    #[serde(default)]
    pub ai_service_url: Option<String>,
    #[serde(default)]
    pub telemetry_url: Option<String>,
}

impl ConfigureRequest {
    fn endpoint_update(&self) -> EndpointUpdate {
        EndpointUpdate {
            node_service_url: self.node_service_url.clone(),
            ai_service_url: self.ai_service_url.clone(),
            telemetry_url: self.telemetry_url.clone(),
        }
    }
}

/// Snapshot returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub running: bool,
    pub phase: CyclePhase,
    pub last_collection_time: Option<DateTime<Utc>>,
    pub collection_interval_minutes: u64,
    pub anomaly_check_interval_minutes: u64,
    pub stats: CycleStats,
    pub source_reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<ServiceEndpoints>,
}

/// State shared by the loop task and the control surface
pub(crate) struct Shared {
    collectors: Vec<Arc<dyn ResourceCollector>>,
    telemetry: Arc<dyn TelemetrySource>,
    persistence: Arc<dyn PersistenceSink>,
    detection: Arc<dyn DetectionService>,
    credentials: Arc<dyn CredentialProvider>,
    monitor: Option<Arc<dyn AnomalyMonitor>>,
    endpoints: Option<EndpointRegistry>,
    alerter: Alerter,
    settings: RwLock<OrchestratorSettings>,
    session: std::sync::Mutex<SessionState>,
    /// Held for the duration of a cycle, by the loop or a manual trigger
    cycle_guard: Mutex<()>,
    stats: StatsHandle,
    health: HealthRegistry,
    metrics: PulseMetrics,
    logger: StructuredLogger,
}

impl Shared {
    fn settings(&self) -> OrchestratorSettings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn on_tick(&self, collection: &mut JobSchedule, sweep: &mut JobSchedule) {
        if self.stats.clear_error() {
            debug!("Cleared error phase");
        }

        if collection.is_due(Instant::now()) {
            match self.cycle_guard.try_lock() {
                Ok(_guard) => {
                    self.run_cycle().await;
                    collection.completed_at(Instant::now(), self.settings().collection_interval);
                }
                Err(_) => debug!("Cycle already in progress, skipping scheduled run"),
            }
        }

        if sweep.is_due(Instant::now()) {
            self.run_sweep().await;
            sweep.completed_at(Instant::now(), self.settings().sweep_interval);
        }
    }
}

struct LoopHandle {
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// The live loop plus one that was told to stop and may still be finishing
#[derive(Default)]
struct LoopSlots {
    current: Option<LoopHandle>,
    stopping: Option<JoinHandle<()>>,
}

/// Scheduler and control surface for collection cycles
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
    runtime: Arc<Mutex<LoopSlots>>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Spawn the scheduling loop unless one is already running
    ///
    /// A loop stopped moments ago is awaited first, so two loops never overlap.
    pub async fn start(&self) -> StartOutcome {
        let mut runtime = self.runtime.lock().await;
        if let Some(handle) = runtime.current.as_ref() {
            if !handle.task.is_finished() {
                return StartOutcome::AlreadyRunning;
            }
        }
        if let Some(previous) = runtime.stopping.take() {
            if let Err(e) = previous.await {
                warn!(error = %e, "Previous collection loop ended abnormally");
            }
        }

        let (shutdown, receiver) = broadcast::channel(1);
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(run_loop(shared, receiver));
        runtime.current = Some(LoopHandle { shutdown, task });

        let settings = self.shared.settings();
        self.shared.metrics.set_running(true);
        self.shared.logger.log_collector_started(
            settings.collection_interval.as_secs(),
            settings.sweep_interval.as_secs(),
        );
        StartOutcome::Started
    }

    /// Signal the loop to exit at its next tick; an in-flight cycle finishes
    pub async fn stop(&self) {
        let mut runtime = self.runtime.lock().await;
        let Some(handle) = runtime.current.take() else {
            return;
        };
        // The loop may already have exited
        let _ = handle.shutdown.send(());
        runtime.stopping = Some(handle.task);
        self.shared.metrics.set_running(false);
        self.shared.logger.log_collector_stopped();
    }

    pub async fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .await
            .current
            .as_ref()
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    /// Run one cycle now unless one is already in flight
    pub async fn trigger_now(&self) -> TriggerOutcome {
        match self.shared.cycle_guard.try_lock() {
            Ok(_guard) => TriggerOutcome::Ran(self.shared.run_cycle().await),
            Err(_) => TriggerOutcome::AlreadyInProgress,
        }
    }

    /// Run the cross-service sweep now and return the surfaced alerts
    pub async fn sweep_now(&self) -> Vec<AnomalyAlert> {
        self.shared.run_sweep().await
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let settings = self.shared.settings();
        let stats = self.shared.stats.snapshot();
        OrchestratorStatus {
            running: self.is_running().await,
            phase: self.shared.stats.phase(),
            last_collection_time: stats.last_collection_time,
            collection_interval_minutes: settings.collection_interval.as_secs() / 60,
            anomaly_check_interval_minutes: settings.sweep_interval.as_secs() / 60,
            stats,
            source_reachable: self.shared.session_ready(),
            endpoints: self.shared.endpoints.as_ref().map(EndpointRegistry::snapshot),
        }
    }

    pub fn stats(&self) -> CycleStats {
        self.shared.stats.snapshot()
    }

    pub fn settings(&self) -> OrchestratorSettings {
        self.shared.settings()
    }

    /// Apply a reconfiguration; nothing changes when any field is invalid
    pub async fn configure(&self, request: &ConfigureRequest) -> Result<OrchestratorStatus> {
        let collection_interval = request
            .collection_interval_minutes
            .map(|m| interval_from_minutes("collectionIntervalMinutes", m))
            .transpose()?;
        let sweep_interval = request
            .anomaly_check_interval_minutes
            .map(|m| interval_from_minutes("anomalyCheckIntervalMinutes", m))
            .transpose()?;

        let update = request.endpoint_update();
        if !update.is_empty() {
            let registry = self.shared.endpoints.as_ref().ok_or_else(|| {
                PulseError::Configuration("endpoints are not configurable in this mode".into())
            })?;
            let endpoints = registry.apply(&update)?;
            self.shared.reset_session();
            info!(
                node_service_url = %endpoints.node_service_url,
                ai_service_url = %endpoints.ai_service_url,
                telemetry_url = %endpoints.telemetry_url,
                "Collaborator endpoints updated"
            );
        }

        {
            let mut settings = self
                .shared
                .settings
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(interval) = collection_interval {
                settings.collection_interval = interval;
            }
            if let Some(interval) = sweep_interval {
                settings.sweep_interval = interval;
            }
        }

        Ok(self.status().await)
    }
}

async fn run_loop(shared: Arc<Shared>, mut shutdown: broadcast::Receiver<()>) {
    let settings = shared.settings();
    info!(
        collection_interval_secs = settings.collection_interval.as_secs(),
        sweep_interval_secs = settings.sweep_interval.as_secs(),
        tick_secs = settings.tick.as_secs(),
        "Starting collection loop"
    );

    let mut collection = JobSchedule::immediately();
    let mut sweep = JobSchedule::after(settings.sweep_interval);
    let mut ticker = interval(settings.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => {
                info!("Shutting down collection loop");
                break;
            }
            _ = ticker.tick() => {
                shared.on_tick(&mut collection, &mut sweep).await;
            }
        }
    }
}

/// Builder wiring collaborators into an [`Orchestrator`]
pub struct OrchestratorBuilder {
    collectors: Option<Vec<Arc<dyn ResourceCollector>>>,
    telemetry: Option<Arc<dyn TelemetrySource>>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    detection: Option<Arc<dyn DetectionService>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    monitor: Option<Arc<dyn AnomalyMonitor>>,
    endpoints: Option<EndpointRegistry>,
    alerter: Alerter,
    settings: OrchestratorSettings,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            collectors: None,
            telemetry: None,
            persistence: None,
            detection: None,
            credentials: None,
            monitor: None,
            endpoints: None,
            alerter: Alerter::new(),
            settings: OrchestratorSettings::default(),
            health: None,
            logger: None,
        }
    }

    /// Set the telemetry source used for sessions and, by default, collectors
    pub fn telemetry(mut self, source: Arc<dyn TelemetrySource>) -> Self {
        self.telemetry = Some(source);
        self
    }

    /// Replace the default per-category collectors
    pub fn collectors(mut self, collectors: Vec<Arc<dyn ResourceCollector>>) -> Self {
        self.collectors = Some(collectors);
        self
    }

    pub fn persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    pub fn detection(mut self, service: Arc<dyn DetectionService>) -> Self {
        self.detection = Some(service);
        self
    }

    pub fn credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(provider);
        self
    }

    pub fn monitor(mut self, monitor: Arc<dyn AnomalyMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Endpoint registry that `configure` may update
    pub fn endpoints(mut self, endpoints: EndpointRegistry) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn alerter(mut self, alerter: Alerter) -> Self {
        self.alerter = alerter;
        self
    }

    pub fn settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<Orchestrator> {
        let telemetry = self
            .telemetry
            .ok_or_else(|| PulseError::Configuration("telemetry source is required".into()))?;
        let persistence = self
            .persistence
            .ok_or_else(|| PulseError::Configuration("persistence sink is required".into()))?;
        let detection = self
            .detection
            .ok_or_else(|| PulseError::Configuration("detection service is required".into()))?;
        let credentials = self
            .credentials
            .ok_or_else(|| PulseError::Configuration("credential provider is required".into()))?;
        if self.settings.tick.is_zero() {
            return Err(PulseError::Configuration("tick must be positive".into()));
        }
        let collectors = self
            .collectors
            .unwrap_or_else(|| default_collectors(Arc::clone(&telemetry)));

        let shared = Shared {
            collectors,
            telemetry,
            persistence,
            detection,
            credentials,
            monitor: self.monitor,
            endpoints: self.endpoints,
            alerter: self.alerter,
            settings: RwLock::new(self.settings),
            session: std::sync::Mutex::new(SessionState::Uninitialized),
            cycle_guard: Mutex::new(()),
            stats: StatsHandle::new(),
            health: self.health.unwrap_or_default(),
            metrics: PulseMetrics::new(),
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("cloud-pulse")),
        };

        Ok(Orchestrator {
            shared: Arc::new(shared),
            runtime: Arc::new(Mutex::new(LoopSlots::default())),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
