//! Detection request/response envelope
//!
//! `AnomalyDetector::detect` is the boundary of the scoring pipeline: every
//! outcome, including insufficient data and internal failures, comes back as
//! a `DetectionResult` rather than an error.

use super::features::{FeatureBuilder, MIN_SAMPLES};
use super::scorer::{OutlierScorer, ScorerConfig};
use super::threshold::{ThresholdDetector, Thresholds};
use crate::error::PulseError;
use crate::models::MetricRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Message attached to results for batches below the minimum size
pub const INSUFFICIENT_DATA_MESSAGE: &str = "insufficient data points";

/// Detection method selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    #[default]
    #[serde(alias = "isolation_forest")]
    Ensemble,
    Threshold,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMethod::Ensemble => write!(f, "ensemble"),
            DetectionMethod::Threshold => write!(f, "threshold"),
        }
    }
}

/// Which bound a threshold anomaly violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    BelowMinimum,
    AboveMaximum,
}

/// Method-specific part of an anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnomalyDetail {
    #[serde(rename_all = "camelCase")]
    Statistical {
        #[serde(alias = "z_score")]
        z_score: f64,
        #[serde(alias = "rolling_mean")]
        rolling_mean: f64,
        #[serde(alias = "deviation_percent")]
        deviation_percent: f64,
    },
    #[serde(rename_all = "camelCase")]
    Threshold {
        #[serde(alias = "metric_name")]
        metric_name: String,
        #[serde(alias = "threshold_type")]
        threshold_type: ThresholdKind,
        #[serde(alias = "threshold_value")]
        threshold_value: f64,
    },
}

/// One flagged point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyRecord {
    /// Position in the (timestamp-sorted, for ensemble) batch
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "metric_value")]
    pub metric_value: f64,
    /// In [0, 1], higher is more anomalous
    #[serde(alias = "anomaly_score")]
    pub anomaly_score: f64,
    #[serde(flatten)]
    pub detail: AnomalyDetail,
}

impl AnomalyRecord {
    pub fn statistical(
        index: usize,
        timestamp: DateTime<Utc>,
        metric_value: f64,
        anomaly_score: f64,
        z_score: f64,
        rolling_mean: f64,
        deviation_percent: f64,
    ) -> Self {
        Self {
            index,
            timestamp,
            metric_value,
            anomaly_score,
            detail: AnomalyDetail::Statistical {
                z_score,
                rolling_mean,
                deviation_percent,
            },
        }
    }

    pub fn threshold(
        index: usize,
        timestamp: DateTime<Utc>,
        metric_value: f64,
        metric_name: &str,
        threshold_type: ThresholdKind,
        threshold_value: f64,
    ) -> Self {
        Self {
            index,
            timestamp,
            metric_value,
            anomaly_score: super::threshold::THRESHOLD_SCORE,
            detail: AnomalyDetail::Threshold {
                metric_name: metric_name.to_string(),
                threshold_type,
                threshold_value,
            },
        }
    }
}

/// Detection request as accepted over the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRequest {
    #[serde(default)]
    pub method: DetectionMethod,
    #[serde(default, alias = "metrics_data")]
    pub metrics_data: Vec<MetricRecord>,
    #[serde(default)]
    pub thresholds: Thresholds,
}

impl DetectionRequest {
    pub fn ensemble(metrics_data: Vec<MetricRecord>) -> Self {
        Self {
            method: DetectionMethod::Ensemble,
            metrics_data,
            thresholds: Thresholds::new(),
        }
    }

    pub fn threshold(metrics_data: Vec<MetricRecord>, thresholds: Thresholds) -> Self {
        Self {
            method: DetectionMethod::Threshold,
            metrics_data,
            thresholds,
        }
    }
}

/// Feature grouping reported alongside ensemble results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureImportance {
    pub primary_features: Vec<String>,
    pub temporal_features: Vec<String>,
    pub statistical_features: Vec<String>,
}

impl Default for FeatureImportance {
    fn default() -> Self {
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
        Self {
            primary_features: names(&["metricValue", "zScore", "pctChange"]),
            temporal_features: names(&["hour", "dayOfWeek", "isWeekend"]),
            statistical_features: names(&["rollingMean12", "rollingStd12"]),
        }
    }
}

/// Outcome of one detection call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    #[serde(default)]
    pub anomalies: Vec<AnomalyRecord>,
    #[serde(default, alias = "anomaly_count")]
    pub anomaly_count: usize,
    #[serde(default, alias = "total_points")]
    pub total_points: usize,
    #[serde(default, alias = "anomaly_rate")]
    pub anomaly_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_params: Option<ScorerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_importance: Option<FeatureImportance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detection_method: Option<String>,
}

impl DetectionResult {
    fn from_anomalies(anomalies: Vec<AnomalyRecord>, total_points: usize) -> Self {
        let anomaly_count = anomalies.len();
        let anomaly_rate = if total_points == 0 {
            0.0
        } else {
            anomaly_count as f64 / total_points as f64
        };
        Self {
            anomalies,
            anomaly_count,
            total_points,
            anomaly_rate,
            ..Default::default()
        }
    }

    pub fn insufficient_data(total_points: usize) -> Self {
        Self {
            total_points,
            message: Some(INSUFFICIENT_DATA_MESSAGE.to_string()),
            ..Default::default()
        }
    }

    pub fn failure(total_points: usize, error: impl Into<String>) -> Self {
        Self {
            total_points,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// In-process detector running either method
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    features: FeatureBuilder,
    scorer: OutlierScorer,
}

impl AnomalyDetector {
    pub fn new(config: ScorerConfig) -> Self {
        Self {
            features: FeatureBuilder::new(),
            scorer: OutlierScorer::new(config),
        }
    }

    pub fn detect(&self, request: &DetectionRequest) -> DetectionResult {
        match request.method {
            DetectionMethod::Ensemble => self.detect_ensemble(&request.metrics_data),
            DetectionMethod::Threshold => {
                self.detect_threshold(&request.metrics_data, &request.thresholds)
            }
        }
    }

    pub fn detect_ensemble(&self, records: &[MetricRecord]) -> DetectionResult {
        let total = records.len();
        if total < MIN_SAMPLES {
            return DetectionResult::insufficient_data(total);
        }

        let scored = self
            .features
            .build(records)
            .and_then(|matrix| self.scorer.score(&matrix));

        match scored {
            Ok(anomalies) => {
                debug!(
                    total_points = total,
                    anomalies = anomalies.len(),
                    "Ensemble detection complete"
                );
                DetectionResult {
                    model_params: Some(*self.scorer.config()),
                    feature_importance: Some(FeatureImportance::default()),
                    ..DetectionResult::from_anomalies(anomalies, total)
                }
            }
            Err(PulseError::InsufficientData { .. }) => DetectionResult::insufficient_data(total),
            Err(e) => DetectionResult::failure(total, format!("anomaly detection failed: {}", e)),
        }
    }

    pub fn detect_threshold(
        &self,
        records: &[MetricRecord],
        thresholds: &Thresholds,
    ) -> DetectionResult {
        let anomalies = ThresholdDetector::new(thresholds).detect(records);
        DetectionResult {
            detection_method: Some("threshold_based".to_string()),
            ..DetectionResult::from_anomalies(anomalies, records.len())
        }
    }
}
