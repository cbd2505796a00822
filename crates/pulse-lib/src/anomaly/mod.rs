//! Anomaly detection for collected metric streams
//!
//! This module provides:
//! - Feature engineering over timestamp-sorted metric batches
//! - Isolation-forest ensemble scoring on standardized features
//! - Static threshold rules
//! - The detection request/response envelope
//! - Alert emission with deduplication

mod alerter;
mod detection;
pub mod features;
mod forest;
mod scorer;
mod threshold;

pub use alerter::{AlertSeverity, AlertSource, Alerter, AnomalyAlert};
pub use detection::{
    AnomalyDetail, AnomalyDetector, AnomalyRecord, DetectionMethod, DetectionRequest,
    DetectionResult, FeatureImportance, ThresholdKind, INSUFFICIENT_DATA_MESSAGE,
};
pub use features::{FeatureBuilder, FeatureMatrix, FeatureVector, MIN_SAMPLES};
pub use forest::{IsolationForest, IsolationTree};
pub use scorer::{OutlierScorer, PointScore, ScorerConfig, DEFAULT_CONTAMINATION};
pub use threshold::{Bounds, ThresholdDetector, Thresholds, THRESHOLD_SCORE};
