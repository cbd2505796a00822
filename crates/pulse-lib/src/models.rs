//! Core data models shared across the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One normalized, timestamped observation of a metric on a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub source: String,
    pub service: String,
    pub resource_id: String,
    pub resource_name: String,
    pub region: String,
    pub metric_name: String,
    pub metric_unit: String,
    pub metric_value: f64,
    pub timestamp: DateTime<Utc>,
    /// Sampling period in seconds
    pub period: u32,
    pub statistic: String,
    #[serde(default)]
    pub dimensions: HashMap<String, String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl MetricRecord {
    /// Key used to group records into detection batches
    pub fn group_key(&self) -> (String, String) {
        (self.service.clone(), self.metric_name.clone())
    }
}

/// Access credentials and region for the telemetry source
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// A resource discovered in one category (an instance, a database, a bucket)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInstance {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Raw statistic sample returned by the telemetry source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Cross-service alert returned by the anomaly monitoring endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAlert {
    pub service: String,
    #[serde(default)]
    pub anomalies: Vec<crate::anomaly::AnomalyRecord>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}
