//! Feature engineering for ensemble scoring
//!
//! Turns a batch of same-group metric records into a positional feature
//! matrix: temporal context, partial-window rolling statistics, rate of
//! change and a rolling z-score.

use crate::error::{PulseError, Result};
use crate::models::MetricRecord;
use chrono::{Datelike, Timelike};

/// Minimum number of records required for feature extraction
pub const MIN_SAMPLES: usize = 10;

/// Short rolling window (points)
pub const SHORT_WINDOW: usize = 12;

/// Long rolling window (points)
pub const LONG_WINDOW: usize = 24;

/// Guards the z-score denominator
pub const Z_EPSILON: f64 = 1e-6;

/// Number of columns in a feature row
pub const FEATURE_COUNT: usize = 10;

/// Column names in positional order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "metricValue",
    "hour",
    "dayOfWeek",
    "isWeekend",
    "rollingMean12",
    "rollingStd12",
    "rollingMean24",
    "diff",
    "pctChange",
    "zScore",
];

/// Derived features for one record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    pub metric_value: f64,
    pub hour: u32,
    /// Monday = 0
    pub day_of_week: u32,
    pub is_weekend: bool,
    pub rolling_mean_12: f64,
    pub rolling_std_12: f64,
    pub rolling_mean_24: f64,
    pub diff: f64,
    pub pct_change: f64,
    pub z_score: f64,
}

impl FeatureVector {
    /// Feature row in the fixed column order the scorer expects
    pub fn to_row(&self) -> [f64; FEATURE_COUNT] {
        [
            self.metric_value,
            self.hour as f64,
            self.day_of_week as f64,
            if self.is_weekend { 1.0 } else { 0.0 },
            self.rolling_mean_12,
            self.rolling_std_12,
            self.rolling_mean_24,
            self.diff,
            self.pct_change,
            self.z_score,
        ]
    }
}

/// Timestamp-sorted records paired 1:1 with their features
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub records: Vec<MetricRecord>,
    pub features: Vec<FeatureVector>,
}

impl FeatureMatrix {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn rows(&self) -> Vec<[f64; FEATURE_COUNT]> {
        self.features.iter().map(FeatureVector::to_row).collect()
    }
}

/// Builds feature matrices from metric batches
#[derive(Debug, Clone)]
pub struct FeatureBuilder {
    min_samples: usize,
}

impl FeatureBuilder {
    pub fn new() -> Self {
        Self {
            min_samples: MIN_SAMPLES,
        }
    }

    pub fn has_sufficient_data(&self, records: &[MetricRecord]) -> bool {
        records.len() >= self.min_samples
    }

    pub fn build(&self, records: &[MetricRecord]) -> Result<FeatureMatrix> {
        if !self.has_sufficient_data(records) {
            return Err(PulseError::InsufficientData {
                required: self.min_samples,
                actual: records.len(),
            });
        }

        if let Some(bad) = records.iter().find(|r| !r.metric_value.is_finite()) {
            return Err(PulseError::Computation(format!(
                "non-finite metric value for {} at {}",
                bad.resource_id, bad.timestamp
            )));
        }

        // sort_by_key is stable, ties keep input order
        let mut sorted = records.to_vec();
        sorted.sort_by_key(|r| r.timestamp);

        let values: Vec<f64> = sorted.iter().map(|r| r.metric_value).collect();
        let features = sorted
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let value = values[i];
                let short = trailing(&values, i, SHORT_WINDOW);
                let rolling_mean_12 = mean(short);
                let rolling_std_12 = sample_std(short);
                let rolling_mean_24 = mean(trailing(&values, i, LONG_WINDOW));

                let (diff, pct_change) = match i.checked_sub(1).map(|p| values[p]) {
                    Some(prev) => (value - prev, pct_change(prev, value)),
                    None => (0.0, 0.0),
                };

                let weekday = record.timestamp.weekday().num_days_from_monday();

                FeatureVector {
                    metric_value: value,
                    hour: record.timestamp.hour(),
                    day_of_week: weekday,
                    is_weekend: weekday >= 5,
                    rolling_mean_12,
                    rolling_std_12,
                    rolling_mean_24,
                    diff,
                    pct_change,
                    z_score: (value - rolling_mean_12) / (rolling_std_12 + Z_EPSILON),
                }
            })
            .collect();

        Ok(FeatureMatrix {
            records: sorted,
            features,
        })
    }
}

impl Default for FeatureBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Up to `window` points ending at `i` inclusive
fn trailing(values: &[f64], i: usize, window: usize) -> &[f64] {
    let start = (i + 1).saturating_sub(window);
    &values[start..=i]
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation, 0 when fewer than two points
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (sum_sq / (values.len() - 1) as f64).sqrt()
}

/// Relative change, 0 when the previous value is zero
fn pct_change(prev: f64, value: f64) -> f64 {
    if prev == 0.0 {
        return 0.0;
    }
    (value - prev) / prev
}
