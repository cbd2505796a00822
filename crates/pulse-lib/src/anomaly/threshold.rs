//! Static threshold detection
//!
//! Flags points whose value falls strictly outside the configured bounds of
//! their metric. No statistics, no minimum batch size.

use super::{AnomalyRecord, ThresholdKind};
use crate::models::MetricRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Optional lower and upper bound for one metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl Bounds {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// Violated bound, if any. Values equal to a bound are within range.
    pub fn check(&self, value: f64) -> Option<(ThresholdKind, f64)> {
        if let Some(min) = self.min.filter(|min| value < *min) {
            return Some((ThresholdKind::BelowMinimum, min));
        }
        if let Some(max) = self.max.filter(|max| value > *max) {
            return Some((ThresholdKind::AboveMaximum, max));
        }
        None
    }
}

/// Bounds keyed by metric name
pub type Thresholds = HashMap<String, Bounds>;

/// Threshold violations always carry full confidence
pub const THRESHOLD_SCORE: f64 = 1.0;

/// Stateless rule-based detector
pub struct ThresholdDetector<'a> {
    thresholds: &'a Thresholds,
}

impl<'a> ThresholdDetector<'a> {
    pub fn new(thresholds: &'a Thresholds) -> Self {
        Self { thresholds }
    }

    /// Flag violations in input order
    pub fn detect(&self, records: &[MetricRecord]) -> Vec<AnomalyRecord> {
        records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                let bounds = self.thresholds.get(&record.metric_name)?;
                let (kind, bound) = bounds.check(record.metric_value)?;
                Some(AnomalyRecord::threshold(
                    index,
                    record.timestamp,
                    record.metric_value,
                    &record.metric_name,
                    kind,
                    bound,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::features::tests::series;
    use crate::anomaly::AnomalyDetail;

    fn cpu_bounds(min: Option<f64>, max: Option<f64>) -> Thresholds {
        HashMap::from([("CPUUtilization".to_string(), Bounds::new(min, max))])
    }

    #[test]
    fn test_boundary_values_are_not_flagged() {
        let thresholds = cpu_bounds(Some(0.0), Some(100.0));
        let records = series(&[0.0, 100.0, 50.0]);
        assert!(ThresholdDetector::new(&thresholds).detect(&records).is_empty());
    }

    #[test]
    fn test_flags_above_and_below() {
        let thresholds = cpu_bounds(Some(10.0), Some(90.0));
        let records = series(&[5.0, 50.0, 95.0]);
        let anomalies = ThresholdDetector::new(&thresholds).detect(&records);

        assert_eq!(anomalies.len(), 2);
        assert_eq!(anomalies[0].index, 0);
        assert_eq!(anomalies[1].index, 2);
        assert!(anomalies.iter().all(|a| a.anomaly_score == THRESHOLD_SCORE));

        match &anomalies[0].detail {
            AnomalyDetail::Threshold {
                threshold_type,
                threshold_value,
                metric_name,
            } => {
                assert_eq!(*threshold_type, ThresholdKind::BelowMinimum);
                assert_eq!(*threshold_value, 10.0);
                assert_eq!(metric_name, "CPUUtilization");
            }
            other => panic!("unexpected detail {:?}", other),
        }
        match &anomalies[1].detail {
            AnomalyDetail::Threshold {
                threshold_type,
                threshold_value,
                ..
            } => {
                assert_eq!(*threshold_type, ThresholdKind::AboveMaximum);
                assert_eq!(*threshold_value, 90.0);
            }
            other => panic!("unexpected detail {:?}", other),
        }
    }

    #[test]
    fn test_missing_bounds_flag_nothing() {
        let records = series(&[-1e9, 0.0, 1e9]);
        let empty = Thresholds::new();
        assert!(ThresholdDetector::new(&empty).detect(&records).is_empty());

        let other_metric =
            HashMap::from([("Errors".to_string(), Bounds::new(Some(0.0), Some(1.0)))]);
        assert!(ThresholdDetector::new(&other_metric)
            .detect(&records)
            .is_empty());
    }

    #[test]
    fn test_single_sided_bounds() {
        let only_max = cpu_bounds(None, Some(80.0));
        let records = series(&[-50.0, 81.0]);
        let anomalies = ThresholdDetector::new(&only_max).detect(&records);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].index, 1);
    }

    #[test]
    fn test_bounds_wire_format() {
        let parsed: Thresholds =
            serde_json::from_str(r#"{"CPUUtilization": {"max": 100}}"#).unwrap();
        assert_eq!(parsed["CPUUtilization"], Bounds::new(None, Some(100.0)));
    }
}
