//! Alert emission for detected anomalies
//!
//! Handles:
//! - Turning per-group detection results into alerts
//! - Filtering cross-service sweep alerts by score threshold
//! - Deduplication of alerts within a configurable window

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AnomalyRecord, DetectionResult};
use crate::models::ServiceAlert;

/// Default deduplication window (15 minutes)
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 15 * 60;

/// Top score at or above which an alert is critical
const CRITICAL_SCORE: f64 = 0.9;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn from_score(score: f64) -> Self {
        if score >= CRITICAL_SCORE {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Where an alert originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSource {
    /// Detection run on a metric group during a collection cycle
    Cycle,
    /// Cross-service anomaly sweep
    Sweep,
}

impl std::fmt::Display for AlertSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSource::Cycle => write!(f, "cycle"),
            AlertSource::Sweep => write!(f, "sweep"),
        }
    }
}

/// An alert ready to be surfaced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyAlert {
    pub source: AlertSource,
    pub severity: AlertSeverity,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    pub anomaly_count: usize,
    pub top_score: f64,
    pub summary: String,
    pub starts_at: DateTime<Utc>,
}

/// Key for deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    source: AlertSource,
    service: String,
    metric_name: Option<String>,
}

/// Alert emitter with deduplication
pub struct Alerter {
    /// Deduplication window
    dedup_window: Duration,
    /// Recent alerts for deduplication (key -> last emission time)
    recent_alerts: RwLock<HashMap<DedupKey, Instant>>,
}

impl Alerter {
    /// Create a new alerter with default 15-minute deduplication window
    pub fn new() -> Self {
        Self {
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            recent_alerts: RwLock::new(HashMap::new()),
        }
    }

    /// Set custom deduplication window
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    fn should_suppress(&self, key: &DedupKey) -> bool {
        let alerts = self
            .recent_alerts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        alerts
            .get(key)
            .map(|last| last.elapsed() < self.dedup_window)
            .unwrap_or(false)
    }

    fn record_alert(&self, key: DedupKey) {
        let mut alerts = self
            .recent_alerts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        alerts.insert(key, Instant::now());

        // Clean up old entries
        alerts.retain(|_, time| time.elapsed() < self.dedup_window);
    }

    /// Alert for one metric group's detection result, unless empty or suppressed
    pub fn alert_for_group(
        &self,
        service: &str,
        metric_name: &str,
        result: &DetectionResult,
    ) -> Option<AnomalyAlert> {
        let top_score = top_score(&result.anomalies)?;
        let key = DedupKey {
            source: AlertSource::Cycle,
            service: service.to_string(),
            metric_name: Some(metric_name.to_string()),
        };
        if self.should_suppress(&key) {
            return None;
        }
        self.record_alert(key);

        Some(AnomalyAlert {
            source: AlertSource::Cycle,
            severity: AlertSeverity::from_score(top_score),
            service: service.to_string(),
            metric_name: Some(metric_name.to_string()),
            anomaly_count: result.anomaly_count,
            top_score,
            summary: format!(
                "{} anomalies in {}/{} ({:.1}% of {} points)",
                result.anomaly_count,
                service,
                metric_name,
                result.anomaly_rate * 100.0,
                result.total_points
            ),
            starts_at: Utc::now(),
        })
    }

    /// Keep sweep alerts whose anomalies reach `threshold`, one alert per service
    pub fn alerts_for_sweep(&self, alerts: &[ServiceAlert], threshold: f64) -> Vec<AnomalyAlert> {
        alerts
            .iter()
            .filter_map(|alert| {
                let severe: Vec<AnomalyRecord> = alert
                    .anomalies
                    .iter()
                    .filter(|a| a.anomaly_score >= threshold)
                    .cloned()
                    .collect();
                let top_score = top_score(&severe)?;

                let key = DedupKey {
                    source: AlertSource::Sweep,
                    service: alert.service.clone(),
                    metric_name: None,
                };
                if self.should_suppress(&key) {
                    return None;
                }
                self.record_alert(key);

                Some(AnomalyAlert {
                    source: AlertSource::Sweep,
                    severity: AlertSeverity::from_score(top_score),
                    service: alert.service.clone(),
                    metric_name: None,
                    anomaly_count: severe.len(),
                    top_score,
                    summary: format!(
                        "{} anomalies scoring at least {:.2} in {}",
                        severe.len(),
                        threshold,
                        alert.service
                    ),
                    starts_at: alert.timestamp.unwrap_or_else(Utc::now),
                })
            })
            .collect()
    }

    /// Clear expired deduplication entries
    pub fn cleanup_dedup_cache(&self) {
        let mut alerts = self
            .recent_alerts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        alerts.retain(|_, time| time.elapsed() < self.dedup_window);
    }
}

impl Default for Alerter {
    fn default() -> Self {
        Self::new()
    }
}

fn top_score(anomalies: &[AnomalyRecord]) -> Option<f64> {
    anomalies
        .iter()
        .map(|a| a.anomaly_score)
        .max_by(f64::total_cmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn anomaly(score: f64) -> AnomalyRecord {
        AnomalyRecord::statistical(0, Utc::now(), 99.0, score, 3.2, 40.0, 320.0)
    }

    fn result_with(scores: &[f64]) -> DetectionResult {
        DetectionResult {
            anomalies: scores.iter().map(|s| anomaly(*s)).collect(),
            anomaly_count: scores.len(),
            total_points: 20,
            anomaly_rate: scores.len() as f64 / 20.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_deduplication() {
        let alerter = Alerter::new().with_dedup_window(Duration::from_millis(100));
        let result = result_with(&[0.7]);

        assert!(alerter
            .alert_for_group("ec2", "CPUUtilization", &result)
            .is_some());
        assert!(alerter
            .alert_for_group("ec2", "CPUUtilization", &result)
            .is_none());

        // Different metric is a different key
        assert!(alerter.alert_for_group("ec2", "NetworkIn", &result).is_some());

        sleep(Duration::from_millis(150));
        assert!(alerter
            .alert_for_group("ec2", "CPUUtilization", &result)
            .is_some());
    }

    #[test]
    fn test_group_alert_content() {
        let alerter = Alerter::new();
        let alert = alerter
            .alert_for_group("rds", "ReadLatency", &result_with(&[0.95, 0.4]))
            .unwrap();

        assert_eq!(alert.source, AlertSource::Cycle);
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert_eq!(alert.anomaly_count, 2);
        assert_eq!(alert.top_score, 0.95);
        assert!(alert.summary.contains("rds/ReadLatency"));
    }

    #[test]
    fn test_empty_result_raises_nothing() {
        let alerter = Alerter::new();
        assert!(alerter
            .alert_for_group("s3", "BucketSizeBytes", &DetectionResult::default())
            .is_none());
    }

    #[test]
    fn test_sweep_alerts_filtered_by_threshold() {
        let alerter = Alerter::new();
        let alerts = vec![
            ServiceAlert {
                service: "ec2".to_string(),
                anomalies: vec![anomaly(0.85), anomaly(0.5)],
                severity: Some("high".to_string()),
                count: 2,
                timestamp: None,
            },
            ServiceAlert {
                service: "lambda".to_string(),
                anomalies: vec![anomaly(0.6)],
                severity: Some("high".to_string()),
                count: 1,
                timestamp: None,
            },
        ];

        let surfaced = alerter.alerts_for_sweep(&alerts, 0.8);
        assert_eq!(surfaced.len(), 1);
        assert_eq!(surfaced[0].service, "ec2");
        assert_eq!(surfaced[0].anomaly_count, 1);
        assert_eq!(surfaced[0].severity, AlertSeverity::Warning);
    }

    #[test]
    fn test_severity_from_score() {
        assert_eq!(AlertSeverity::from_score(0.9), AlertSeverity::Critical);
        assert_eq!(AlertSeverity::from_score(0.89), AlertSeverity::Warning);
        assert_eq!(AlertSeverity::Critical.to_string(), "critical");
    }
}
