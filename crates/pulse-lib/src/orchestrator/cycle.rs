//! One collect, store and detect pass plus the cross-service sweep

use super::stats::CyclePhase;
use super::Shared;
use crate::anomaly::{AnomalyAlert, DetectionRequest, MIN_SAMPLES};
use crate::collector::CollectionScope;
use crate::error::{PulseError, Result};
use crate::health::Component;
use crate::models::MetricRecord;
use crate::upstream::names;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    #[serde(rename_all = "camelCase")]
    Completed {
        records_collected: usize,
        groups_analyzed: usize,
        anomalies_found: usize,
        /// Names of sub-collectors that failed or timed out
        failed_collectors: Vec<String>,
    },
    StoreFailed {
        error: String,
    },
    Failed {
        error: String,
    },
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Completed { .. })
    }
}

/// Session state of the telemetry source
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) enum SessionState {
    #[default]
    Uninitialized,
    Ready {
        region: String,
    },
}

/// Bound a collaborator call; elapsing counts as that collaborator's failure
async fn bounded<T>(
    collaborator: &'static str,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(PulseError::timeout(collaborator, limit)))
}

struct DetectionSummary {
    groups_analyzed: usize,
    anomalies_found: usize,
    failed_groups: Vec<String>,
}

impl Shared {
    fn session(&self) -> SessionState {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn reset_session(&self) {
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = SessionState::Uninitialized;
    }

    pub(crate) fn session_ready(&self) -> bool {
        matches!(self.session(), SessionState::Ready { .. })
    }

    /// Region of a ready session, connecting first if needed
    async fn ensure_session(&self, limit: Duration) -> Result<String> {
        if let SessionState::Ready { region } = self.session() {
            return Ok(region);
        }

        let credentials = bounded(names::CREDENTIALS, limit, self.credentials.credentials())
            .await?
            .ok_or_else(|| PulseError::Configuration("no cloud credentials configured".into()))?;

        if let Err(e) = bounded(names::TELEMETRY, limit, self.telemetry.connect(&credentials)).await
        {
            self.health
                .set_unhealthy(Component::Telemetry, e.to_string())
                .await;
            return Err(e);
        }

        info!(region = %credentials.region, "Telemetry session established");
        self.health.set_healthy(Component::Telemetry).await;
        *self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = SessionState::Ready {
            region: credentials.region.clone(),
        };
        Ok(credentials.region)
    }

    pub(crate) async fn run_cycle(&self) -> CycleOutcome {
        let started = Instant::now();
        let settings = self.settings();

        let region = match self.ensure_session(settings.collector_timeout).await {
            Ok(region) => region,
            Err(e) => {
                let error = e.to_string();
                self.stats.record_aborted(&error);
                self.metrics.inc_cycle_failures();
                self.logger.log_cycle_failed("session", &error);
                return CycleOutcome::Failed { error };
            }
        };

        self.stats.begin_cycle();
        self.metrics.inc_cycles();

        let scope = CollectionScope::last(settings.lookback, region);
        let (records, failed_collectors) = self.collect_all(&scope, settings.collector_timeout).await;
        self.metrics.add_records_collected(records.len());

        if records.is_empty() {
            info!("No metrics collected this cycle");
            self.stats.record_success();
            self.stats.finish_cycle(Utc::now());
            self.finish(started, 0, 0, 0, &failed_collectors);
            return CycleOutcome::Completed {
                records_collected: 0,
                groups_analyzed: 0,
                anomalies_found: 0,
                failed_collectors,
            };
        }

        self.stats.set_phase(CyclePhase::Storing);
        let stored = bounded(
            names::PERSISTENCE,
            settings.store_timeout,
            self.persistence.store(&records),
        )
        .await;
        if let Err(e) = stored {
            let error = e.to_string();
            self.health
                .set_unhealthy(Component::Persistence, error.clone())
                .await;
            self.stats.record_failure(&error);
            self.metrics.inc_cycle_failures();
            self.metrics.observe_cycle_duration(started.elapsed().as_secs_f64());
            self.logger.log_cycle_failed("storing", &error);
            return CycleOutcome::StoreFailed { error };
        }
        self.health.set_healthy(Component::Persistence).await;
        self.stats.record_success();

        self.stats.set_phase(CyclePhase::Detecting);
        let records_collected = records.len();
        let summary = self.detect_groups(records, settings.detect_timeout).await;
        if summary.failed_groups.is_empty() {
            self.health.set_healthy(Component::Detector).await;
        } else {
            self.health
                .set_degraded(
                    Component::Detector,
                    format!("detection failed for {}", summary.failed_groups.join(", ")),
                )
                .await;
        }

        self.stats.finish_cycle(Utc::now());
        self.finish(
            started,
            records_collected,
            summary.groups_analyzed,
            summary.anomalies_found,
            &failed_collectors,
        );

        CycleOutcome::Completed {
            records_collected,
            groups_analyzed: summary.groups_analyzed,
            anomalies_found: summary.anomalies_found,
            failed_collectors,
        }
    }

    fn finish(
        &self,
        started: Instant,
        records: usize,
        groups: usize,
        anomalies: usize,
        failed_collectors: &[String],
    ) {
        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.observe_cycle_duration(elapsed);
        self.logger
            .log_cycle_completed(records, groups, anomalies, failed_collectors.len(), elapsed);
    }

    /// Run every sub-collector in turn; failures are isolated per collector
    async fn collect_all(
        &self,
        scope: &CollectionScope,
        limit: Duration,
    ) -> (Vec<MetricRecord>, Vec<String>) {
        let mut records = Vec::new();
        let mut failed = Vec::new();

        for collector in &self.collectors {
            match bounded(names::TELEMETRY, limit, collector.collect(scope)).await {
                Ok(batch) => {
                    debug!(collector = collector.name(), records = batch.len(), "Collected");
                    records.extend(batch);
                }
                Err(e) => {
                    warn!(
                        collector = collector.name(),
                        error = %e,
                        "Sub-collector failed, continuing with the rest"
                    );
                    self.metrics.inc_collector_errors();
                    failed.push(collector.name().to_string());
                }
            }
        }

        if failed.is_empty() {
            self.health.set_healthy(Component::Collector).await;
        } else {
            self.health
                .set_degraded(
                    Component::Collector,
                    format!("failed collectors: {}", failed.join(", ")),
                )
                .await;
        }

        (records, failed)
    }

    /// One detection call per (service, metricName) group with enough points
    async fn detect_groups(&self, records: Vec<MetricRecord>, limit: Duration) -> DetectionSummary {
        let mut groups: BTreeMap<(String, String), Vec<MetricRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.group_key()).or_default().push(record);
        }

        let mut summary = DetectionSummary {
            groups_analyzed: 0,
            anomalies_found: 0,
            failed_groups: Vec::new(),
        };

        for ((service, metric_name), batch) in groups {
            if batch.len() < MIN_SAMPLES {
                debug!(
                    service = %service,
                    metric_name = %metric_name,
                    points = batch.len(),
                    "Group below minimum size, skipping detection"
                );
                continue;
            }
            summary.groups_analyzed += 1;
            let group = format!("{}/{}", service, metric_name);

            let request = DetectionRequest::ensemble(batch);
            let started = Instant::now();
            let outcome = bounded(names::DETECTION, limit, self.detection.detect(&request)).await;
            self.metrics
                .observe_detection_duration(started.elapsed().as_secs_f64());

            let result = match outcome {
                Ok(result) if result.is_error() => {
                    warn!(
                        group = %group,
                        error = result.error.as_deref().unwrap_or_default(),
                        "Detection reported an error"
                    );
                    summary.failed_groups.push(group);
                    continue;
                }
                Ok(result) => result,
                Err(e) => {
                    warn!(group = %group, error = %e, "Detection call failed");
                    summary.failed_groups.push(group);
                    continue;
                }
            };

            if result.anomaly_count == 0 {
                continue;
            }
            summary.anomalies_found += result.anomaly_count;
            self.metrics.add_anomalies_detected(result.anomaly_count);
            if let Some(alert) = self.alerter.alert_for_group(&service, &metric_name, &result) {
                self.logger.log_anomaly_alert(&alert);
            }
        }

        summary
    }

    /// Cross-service sweep; failures are logged and never counted as cycles
    pub(crate) async fn run_sweep(&self) -> Vec<AnomalyAlert> {
        let Some(monitor) = &self.monitor else {
            debug!("No anomaly monitor configured, skipping sweep");
            return Vec::new();
        };
        let settings = self.settings();

        let alerts = match bounded(
            names::MONITOR,
            settings.sweep_timeout,
            monitor.sweep(&settings.sweep_services, settings.alert_threshold),
        )
        .await
        {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(error = %e, "Anomaly sweep failed");
                return Vec::new();
            }
        };

        let surfaced = self
            .alerter
            .alerts_for_sweep(&alerts, settings.alert_threshold);
        for alert in &surfaced {
            self.logger.log_anomaly_alert(alert);
        }
        self.metrics.add_sweep_alerts(surfaced.len());
        debug!(
            returned = alerts.len(),
            surfaced = surfaced.len(),
            "Anomaly sweep complete"
        );
        surfaced
    }
}
