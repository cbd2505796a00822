//! Metrics collection from the cloud telemetry source
//!
//! A [`TelemetrySource`] answers resource listings and statistics queries.
//! One [`ResourceCollector`] per resource category turns those answers into
//! normalized [`MetricRecord`]s for a collection window.

mod catalog;
mod http_source;

#[cfg(test)]
mod tests;

pub use catalog::{
    CatalogCollector, MetricSpec, ResourceCategory, DAILY_PERIOD_SECS, DEFAULT_PERIOD_SECS,
    SOURCE,
};
pub use http_source::HttpTelemetrySource;

use crate::error::Result;
use crate::models::{Credentials, Datapoint, MetricRecord, ResourceInstance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use async_trait::async_trait;

/// Time window and region one collection covers
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionScope {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub region: String,
}

impl CollectionScope {
    /// Window of `lookback` ending at `end`
    pub fn ending_at(end: DateTime<Utc>, lookback: Duration, region: impl Into<String>) -> Self {
        let lookback = chrono::Duration::from_std(lookback).unwrap_or(chrono::Duration::zero());
        Self {
            start: end - lookback,
            end,
            region: region.into(),
        }
    }

    /// Window of `lookback` ending now
    pub fn last(lookback: Duration, region: impl Into<String>) -> Self {
        Self::ending_at(Utc::now(), lookback, region)
    }
}

/// One statistics query for a single (resource, metric) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsQuery {
    pub category: ResourceCategory,
    pub namespace: String,
    pub metric_name: String,
    pub dimensions: HashMap<String, String>,
    pub statistic: String,
    /// Sampling period in seconds
    pub period: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Boundary to the cloud provider's monitoring API
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Open a session with the given credentials (connectivity check)
    async fn connect(&self, credentials: &Credentials) -> Result<()>;

    /// List the live resources of one category
    async fn list_resources(&self, category: ResourceCategory) -> Result<Vec<ResourceInstance>>;

    /// Raw datapoints for one query; may be empty
    async fn get_statistics(&self, query: &StatisticsQuery) -> Result<Vec<Datapoint>>;
}

/// Trait for per-category collection implementations
#[async_trait]
pub trait ResourceCollector: Send + Sync {
    /// Short name used in logs and failure reports
    fn name(&self) -> &str;

    /// Collect every record of this category inside `scope`
    async fn collect(&self, scope: &CollectionScope) -> Result<Vec<MetricRecord>>;
}

/// One catalog collector per resource category, sharing `source`
pub fn default_collectors(source: Arc<dyn TelemetrySource>) -> Vec<Arc<dyn ResourceCollector>> {
    ResourceCategory::ALL
        .iter()
        .map(|category| {
            Arc::new(CatalogCollector::new(*category, Arc::clone(&source)))
                as Arc<dyn ResourceCollector>
        })
        .collect()
}
