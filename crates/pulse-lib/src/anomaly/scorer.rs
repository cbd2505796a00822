//! Ensemble outlier scoring
//!
//! Standardizes the feature matrix of one batch, fits an isolation forest on
//! it and reports the points labeled anomalous. Nothing is retained between
//! calls: each batch is scored against itself only.

use super::features::{FeatureMatrix, FEATURE_COUNT};
use super::forest::{IsolationForest, DEFAULT_MAX_SAMPLES, DEFAULT_SEED, DEFAULT_TREES};
use super::AnomalyRecord;
use crate::error::{PulseError, Result};
use serde::{Deserialize, Serialize};

/// Default expected fraction of anomalous points
pub const DEFAULT_CONTAMINATION: f64 = 0.1;

/// Parameters of the isolation forest scorer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorerConfig {
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            contamination: DEFAULT_CONTAMINATION,
            n_estimators: DEFAULT_TREES,
            max_samples: DEFAULT_MAX_SAMPLES,
            seed: DEFAULT_SEED,
        }
    }
}

/// Unsupervised scorer over standardized features
#[derive(Debug, Clone, Default)]
pub struct OutlierScorer {
    config: ScorerConfig,
}

impl OutlierScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Normalized score and label for every point of the matrix
    pub fn evaluate(&self, matrix: &FeatureMatrix) -> Result<Vec<PointScore>> {
        if !(self.config.contamination > 0.0 && self.config.contamination <= 0.5) {
            return Err(PulseError::Computation(format!(
                "contamination must be in (0, 0.5], got {}",
                self.config.contamination
            )));
        }
        if matrix.is_empty() {
            return Ok(Vec::new());
        }

        // A flat series has nothing to isolate, whatever its timestamps
        let first = matrix.records[0].metric_value;
        if matrix.records.iter().all(|r| r.metric_value == first) {
            return Ok(vec![
                PointScore {
                    score: 0.0,
                    is_anomaly: false,
                };
                matrix.len()
            ]);
        }

        let standardized = standardize(&matrix.rows())?;
        let forest = IsolationForest::fit(
            &standardized,
            self.config.n_estimators,
            self.config.max_samples,
            self.config.seed,
        );
        let raw = forest.score_all(&standardized);
        if let Some(i) = raw.iter().position(|s| !s.is_finite()) {
            return Err(PulseError::Computation(format!(
                "non-finite anomaly score at index {}",
                i
            )));
        }

        let boundary = quantile(&raw, 1.0 - self.config.contamination);
        Ok(min_max_normalize(&raw)
            .into_iter()
            .zip(&raw)
            .map(|(score, r)| PointScore {
                score,
                is_anomaly: *r > boundary,
            })
            .collect())
    }

    /// Score a feature matrix, returning anomalies sorted by score descending
    pub fn score(&self, matrix: &FeatureMatrix) -> Result<Vec<AnomalyRecord>> {
        let points = self.evaluate(matrix)?;

        let mut anomalies: Vec<AnomalyRecord> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_anomaly)
            .map(|(i, p)| {
                let record = &matrix.records[i];
                let features = &matrix.features[i];
                let deviation_percent = if features.rolling_std_12 > 0.0 {
                    features.z_score.abs() * 100.0
                } else {
                    0.0
                };
                AnomalyRecord::statistical(
                    i,
                    record.timestamp,
                    record.metric_value,
                    p.score,
                    features.z_score,
                    features.rolling_mean_12,
                    deviation_percent,
                )
            })
            .collect();

        // Stable sort keeps index order on equal scores
        anomalies.sort_by(|a, b| b.anomaly_score.total_cmp(&a.anomaly_score));
        Ok(anomalies)
    }
}

/// Per-point scorer output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointScore {
    /// Min-max normalized score, 1.0 is most anomalous
    pub score: f64,
    pub is_anomaly: bool,
}

/// Zero mean, unit variance per column using population statistics.
/// Constant columns map to zero.
fn standardize(rows: &[[f64; FEATURE_COUNT]]) -> Result<Vec<Vec<f64>>> {
    let n = rows.len() as f64;
    let mut means = [0.0; FEATURE_COUNT];
    let mut scales = [1.0; FEATURE_COUNT];

    for col in 0..FEATURE_COUNT {
        let mean = rows.iter().map(|r| r[col]).sum::<f64>() / n;
        let var = rows.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / n;
        let std = var.sqrt();
        means[col] = mean;
        if std > f64::EPSILON * mean.abs().max(1.0) {
            scales[col] = std;
        }
    }

    rows.iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(col, v)| {
                    let z = (v - means[col]) / scales[col];
                    if z.is_finite() {
                        Ok(z)
                    } else {
                        Err(PulseError::Computation(format!(
                            "non-finite standardized value in column {}",
                            col
                        )))
                    }
                })
                .collect()
        })
        .collect()
}

/// Linear-interpolated quantile, `q` in [0, 1]
fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

/// Rescale into [0, 1]; an all-equal batch maps to zeros
fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range <= 0.0 {
        return vec![0.0; values.len()];
    }
    values
        .iter()
        .map(|v| ((v - min) / range).clamp(0.0, 1.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::features::tests::{series, series_from};
    use crate::anomaly::features::FeatureBuilder;
    use chrono::{TimeZone, Utc};

    fn score_values(values: &[f64]) -> Vec<AnomalyRecord> {
        let matrix = FeatureBuilder::new().build(&series(values)).unwrap();
        OutlierScorer::default().score(&matrix).unwrap()
    }

    fn noisy_with_spike() -> Vec<f64> {
        let mut values: Vec<f64> = (0..40).map(|i| 50.0 + ((i * 7) % 5) as f64).collect();
        values[25] = 400.0;
        values
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&values, 0.5), 3.0);
        assert!((quantile(&values, 0.9) - 4.6).abs() < 1e-12);
        assert_eq!(quantile(&values, 1.0), 5.0);
    }

    #[test]
    fn test_min_max_normalize_degenerate() {
        assert_eq!(min_max_normalize(&[0.4, 0.4, 0.4]), vec![0.0, 0.0, 0.0]);
        assert_eq!(min_max_normalize(&[1.0, 3.0, 2.0]), vec![0.0, 1.0, 0.5]);
    }

    #[test]
    fn test_standardize_constant_column_is_zero() {
        let rows = vec![[5.0; FEATURE_COUNT]; 4];
        let out = standardize(&rows).unwrap();
        assert!(out.iter().flatten().all(|v| *v == 0.0));
    }

    #[test]
    fn test_spike_is_top_anomaly() {
        let anomalies = score_values(&noisy_with_spike());
        assert!(!anomalies.is_empty());
        assert_eq!(anomalies[0].index, 25);
        assert_eq!(anomalies[0].anomaly_score, 1.0);
    }

    #[test]
    fn test_scores_within_unit_interval_and_sorted() {
        let anomalies = score_values(&noisy_with_spike());
        assert!(anomalies
            .iter()
            .all(|a| (0.0..=1.0).contains(&a.anomaly_score)));
        assert!(anomalies
            .windows(2)
            .all(|w| w[0].anomaly_score >= w[1].anomaly_score));
    }

    #[test]
    fn test_contamination_bounds_anomaly_count() {
        let values = noisy_with_spike();
        let anomalies = score_values(&values);
        // Strictly above the 90th percentile leaves at most 10% of 40 points
        assert!(anomalies.len() <= 4, "got {} anomalies", anomalies.len());
    }

    #[test]
    fn test_constant_batch_scores_zero_everywhere() {
        let matrix = FeatureBuilder::new().build(&series(&[7.0; 12])).unwrap();
        let points = OutlierScorer::default().evaluate(&matrix).unwrap();
        assert_eq!(points.len(), 12);
        assert!(points.iter().all(|p| p.score == 0.0 && !p.is_anomaly));
        assert!(score_values(&[7.0; 12]).is_empty());
    }

    #[test]
    fn test_constant_batch_across_hour_and_day_boundaries() {
        for start in [
            Utc.with_ymd_and_hms(2024, 3, 4, 8, 50, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 3, 23, 50, 0).unwrap(),
        ] {
            let matrix = FeatureBuilder::new()
                .build(&series_from(start, &[40.0; 30]))
                .unwrap();
            let points = OutlierScorer::default().evaluate(&matrix).unwrap();
            assert_eq!(points.len(), 30);
            assert!(points.iter().all(|p| p.score == 0.0 && !p.is_anomaly));
            assert!(OutlierScorer::default().score(&matrix).unwrap().is_empty());
        }
    }

    #[test]
    fn test_single_spike_in_flat_batch() {
        let mut values = vec![50.0; 11];
        values[5] = 500.0;
        let anomalies = score_values(&values);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].index, 5);
        assert_eq!(anomalies[0].metric_value, 500.0);
        assert_eq!(anomalies[0].anomaly_score, 1.0);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let values = noisy_with_spike();
        assert_eq!(score_values(&values), score_values(&values));
    }

    #[test]
    fn test_invalid_contamination_is_computation_error() {
        let matrix = FeatureBuilder::new().build(&series(&[1.0; 10])).unwrap();
        let scorer = OutlierScorer::new(ScorerConfig {
            contamination: 0.0,
            ..Default::default()
        });
        assert!(matches!(
            scorer.score(&matrix),
            Err(PulseError::Computation(_))
        ));
    }
}
