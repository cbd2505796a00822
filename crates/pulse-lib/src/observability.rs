//! Observability infrastructure for the collector
//!
//! Provides:
//! - Prometheus metrics (cycle and detection latency, cycle outcomes, anomaly counts)
//! - Structured JSON logging of domain events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::anomaly::{AlertSeverity, AnomalyAlert};

/// Cycles call slow upstream services, so buckets run from 10ms to 5 minutes
const CYCLE_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

const DETECTION_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PulseMetricsInner> = OnceLock::new();

struct PulseMetricsInner {
    cycle_duration_seconds: Histogram,
    detection_duration_seconds: Histogram,
    cycles_total: IntCounter,
    cycle_failures_total: IntCounter,
    records_collected_total: IntCounter,
    collector_errors_total: IntCounter,
    anomalies_detected_total: IntCounter,
    sweep_alerts_total: IntCounter,
    orchestrator_running: IntGauge,
}

impl PulseMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "cloud_pulse_cycle_duration_seconds",
                "Wall time of one collect, store and detect cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            detection_duration_seconds: register_histogram!(
                "cloud_pulse_detection_duration_seconds",
                "Time spent on one metric group's detection call",
                DETECTION_BUCKETS.to_vec()
            )
            .expect("Failed to register detection_duration_seconds"),

            cycles_total: register_int_counter!(
                "cloud_pulse_cycles_total",
                "Collection cycles started"
            )
            .expect("Failed to register cycles_total"),

            cycle_failures_total: register_int_counter!(
                "cloud_pulse_cycle_failures_total",
                "Collection cycles that failed"
            )
            .expect("Failed to register cycle_failures_total"),

            records_collected_total: register_int_counter!(
                "cloud_pulse_records_collected_total",
                "Metric records gathered from all sub-collectors"
            )
            .expect("Failed to register records_collected_total"),

            collector_errors_total: register_int_counter!(
                "cloud_pulse_collector_errors_total",
                "Sub-collector failures, including timeouts"
            )
            .expect("Failed to register collector_errors_total"),

            anomalies_detected_total: register_int_counter!(
                "cloud_pulse_anomalies_detected_total",
                "Anomalies flagged by per-cycle detection"
            )
            .expect("Failed to register anomalies_detected_total"),

            sweep_alerts_total: register_int_counter!(
                "cloud_pulse_sweep_alerts_total",
                "Alerts surfaced by the cross-service sweep"
            )
            .expect("Failed to register sweep_alerts_total"),

            orchestrator_running: register_int_gauge!(
                "cloud_pulse_orchestrator_running",
                "1 while the scheduling loop is running"
            )
            .expect("Failed to register orchestrator_running"),
        }
    }
}

/// Collector metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share
/// the same underlying metrics.
#[derive(Clone)]
pub struct PulseMetrics {
    _private: (),
}

impl Default for PulseMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PulseMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PulseMetricsInner {
        GLOBAL_METRICS.get_or_init(PulseMetricsInner::new)
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn observe_detection_duration(&self, duration_secs: f64) {
        self.inner().detection_duration_seconds.observe(duration_secs);
    }

    pub fn inc_cycles(&self) {
        self.inner().cycles_total.inc();
    }

    pub fn inc_cycle_failures(&self) {
        self.inner().cycle_failures_total.inc();
    }

    pub fn add_records_collected(&self, count: usize) {
        self.inner().records_collected_total.inc_by(count as u64);
    }

    pub fn inc_collector_errors(&self) {
        self.inner().collector_errors_total.inc();
    }

    pub fn add_anomalies_detected(&self, count: usize) {
        self.inner().anomalies_detected_total.inc_by(count as u64);
    }

    pub fn add_sweep_alerts(&self, count: usize) {
        self.inner().sweep_alerts_total.inc_by(count as u64);
    }

    pub fn set_running(&self, running: bool) {
        self.inner().orchestrator_running.set(i64::from(running));
    }
}

/// Structured logger for collector events
///
/// Every event carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_cycle_completed(
        &self,
        records_collected: usize,
        groups_analyzed: usize,
        anomalies_found: usize,
        failed_collectors: usize,
        duration_secs: f64,
    ) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            records_collected = records_collected,
            groups_analyzed = groups_analyzed,
            anomalies_found = anomalies_found,
            failed_collectors = failed_collectors,
            duration_secs = duration_secs,
            "Collection cycle completed"
        );
    }

    pub fn log_cycle_failed(&self, stage: &str, error: &str) {
        warn!(
            event = "cycle_failed",
            instance = %self.instance,
            stage = %stage,
            error = %error,
            "Collection cycle failed"
        );
    }

    /// Log one alert; critical alerts go out at warn level
    pub fn log_anomaly_alert(&self, alert: &AnomalyAlert) {
        let event = match alert.source {
            crate::anomaly::AlertSource::Cycle => "anomalies_detected",
            crate::anomaly::AlertSource::Sweep => "sweep_alerts",
        };
        let metric = alert.metric_name.as_deref().unwrap_or("*");
        match alert.severity {
            AlertSeverity::Critical => {
                warn!(
                    event = event,
                    instance = %self.instance,
                    service = %alert.service,
                    metric_name = %metric,
                    severity = %alert.severity,
                    anomaly_count = alert.anomaly_count,
                    top_score = alert.top_score,
                    summary = %alert.summary,
                    "Critical anomaly detected"
                );
            }
            AlertSeverity::Warning => {
                info!(
                    event = event,
                    instance = %self.instance,
                    service = %alert.service,
                    metric_name = %metric,
                    severity = %alert.severity,
                    anomaly_count = alert.anomaly_count,
                    top_score = alert.top_score,
                    summary = %alert.summary,
                    "Anomaly detected"
                );
            }
        }
    }

    pub fn log_collector_started(&self, collection_interval_secs: u64, sweep_interval_secs: u64) {
        info!(
            event = "collector_started",
            instance = %self.instance,
            collection_interval_secs = collection_interval_secs,
            sweep_interval_secs = sweep_interval_secs,
            "Collection loop started"
        );
    }

    pub fn log_collector_stopped(&self) {
        info!(
            event = "collector_stopped",
            instance = %self.instance,
            "Collection loop stopped"
        );
    }

    pub fn log_startup(&self, version: &str, detection: &str) {
        info!(
            event = "agent_started",
            instance = %self.instance,
            agent_version = %version,
            detection = %detection,
            "Cloud pulse agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Cloud pulse agent shutting down"
        );
    }
}
