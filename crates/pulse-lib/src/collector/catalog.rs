//! Catalog-driven sub-collectors
//!
//! Each resource category has a fixed table of metrics. A collector lists the
//! category's resources, queries every (resource, metric) pair and normalizes
//! the datapoints into [`MetricRecord`]s.

use super::{CollectionScope, ResourceCollector, StatisticsQuery, TelemetrySource};
use crate::error::Result;
use crate::models::{MetricRecord, ResourceInstance};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Provider label stamped on every record
pub const SOURCE: &str = "aws";

/// Sampling period for most categories (5 minutes)
pub const DEFAULT_PERIOD_SECS: u32 = 300;

/// Storage metrics are published daily
pub const DAILY_PERIOD_SECS: u32 = 86_400;

/// One metric queried for every resource of a category
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSpec {
    /// Name the metric is queried under
    pub query_name: &'static str,
    /// Name written to the record; differs when one metric is emitted twice
    pub record_name: &'static str,
    pub unit: &'static str,
    pub statistic: &'static str,
    /// Extra fixed dimension added next to the resource id
    pub extra_dimension: Option<(&'static str, &'static str)>,
}

impl MetricSpec {
    const fn new(name: &'static str, unit: &'static str, statistic: &'static str) -> Self {
        Self {
            query_name: name,
            record_name: name,
            unit,
            statistic,
            extra_dimension: None,
        }
    }

    const fn emitted_as(mut self, record_name: &'static str) -> Self {
        self.record_name = record_name;
        self
    }

    const fn with_dimension(mut self, key: &'static str, value: &'static str) -> Self {
        self.extra_dimension = Some((key, value));
        self
    }
}

const COMPUTE_METRICS: &[MetricSpec] = &[
    MetricSpec::new("CPUUtilization", "Percent", "Average"),
    MetricSpec::new("CPUUtilization", "Percent", "Maximum").emitted_as("CPUUtilizationMax"),
];

const DATABASE_METRICS: &[MetricSpec] = &[
    MetricSpec::new("CPUUtilization", "Percent", "Average"),
    MetricSpec::new("DatabaseConnections", "Count", "Average"),
    MetricSpec::new("ReadLatency", "Seconds", "Average"),
    MetricSpec::new("WriteLatency", "Seconds", "Average"),
];

const FUNCTION_METRICS: &[MetricSpec] = &[
    MetricSpec::new("Invocations", "Count", "Sum"),
    MetricSpec::new("Duration", "Milliseconds", "Average"),
    MetricSpec::new("Errors", "Count", "Average"),
    MetricSpec::new("Throttles", "Count", "Average"),
];

const OBJECT_STORAGE_METRICS: &[MetricSpec] = &[
    MetricSpec::new("BucketSizeBytes", "Bytes", "Average")
        .with_dimension("StorageType", "StandardStorage"),
    MetricSpec::new("NumberOfObjects", "Count", "Average")
        .with_dimension("StorageType", "AllStorageTypes"),
];

/// Resource categories with their own sub-collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    Compute,
    Database,
    Functions,
    ObjectStorage,
}

impl ResourceCategory {
    pub const ALL: [ResourceCategory; 4] = [
        ResourceCategory::Compute,
        ResourceCategory::Database,
        ResourceCategory::Functions,
        ResourceCategory::ObjectStorage,
    ];

    /// Service label written to records
    pub fn service(&self) -> &'static str {
        match self {
            ResourceCategory::Compute => "ec2",
            ResourceCategory::Database => "rds",
            ResourceCategory::Functions => "lambda",
            ResourceCategory::ObjectStorage => "s3",
        }
    }

    pub fn namespace(&self) -> &'static str {
        match self {
            ResourceCategory::Compute => "AWS/EC2",
            ResourceCategory::Database => "AWS/RDS",
            ResourceCategory::Functions => "AWS/Lambda",
            ResourceCategory::ObjectStorage => "AWS/S3",
        }
    }

    /// Dimension that identifies a resource of this category
    pub fn id_dimension(&self) -> &'static str {
        match self {
            ResourceCategory::Compute => "InstanceId",
            ResourceCategory::Database => "DBInstanceIdentifier",
            ResourceCategory::Functions => "FunctionName",
            ResourceCategory::ObjectStorage => "BucketName",
        }
    }

    pub fn period(&self) -> u32 {
        match self {
            ResourceCategory::ObjectStorage => DAILY_PERIOD_SECS,
            _ => DEFAULT_PERIOD_SECS,
        }
    }

    pub fn metrics(&self) -> &'static [MetricSpec] {
        match self {
            ResourceCategory::Compute => COMPUTE_METRICS,
            ResourceCategory::Database => DATABASE_METRICS,
            ResourceCategory::Functions => FUNCTION_METRICS,
            ResourceCategory::ObjectStorage => OBJECT_STORAGE_METRICS,
        }
    }

    /// Display name of a resource; compute instances prefer their `Name` tag
    pub fn resource_name(&self, resource: &ResourceInstance) -> String {
        match self {
            ResourceCategory::Compute => resource
                .tags
                .get("Name")
                .cloned()
                .unwrap_or_else(|| format!("EC2-{}", resource.id)),
            _ => resource.name.clone().unwrap_or_else(|| resource.id.clone()),
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceCategory::Compute => "compute",
            ResourceCategory::Database => "database",
            ResourceCategory::Functions => "functions",
            ResourceCategory::ObjectStorage => "object_storage",
        };
        f.write_str(label)
    }
}

/// Sub-collector for one resource category
pub struct CatalogCollector {
    category: ResourceCategory,
    source: Arc<dyn TelemetrySource>,
}

impl CatalogCollector {
    pub fn new(category: ResourceCategory, source: Arc<dyn TelemetrySource>) -> Self {
        Self { category, source }
    }

    fn dimensions(&self, resource: &ResourceInstance, spec: &MetricSpec) -> HashMap<String, String> {
        let mut dimensions = HashMap::from([(
            self.category.id_dimension().to_string(),
            resource.id.clone(),
        )]);
        if let Some((key, value)) = spec.extra_dimension {
            dimensions.insert(key.to_string(), value.to_string());
        }
        dimensions
    }

    async fn collect_pair(
        &self,
        resource: &ResourceInstance,
        spec: &MetricSpec,
        scope: &CollectionScope,
    ) -> Result<Vec<MetricRecord>> {
        let dimensions = self.dimensions(resource, spec);
        let query = StatisticsQuery {
            category: self.category,
            namespace: self.category.namespace().to_string(),
            metric_name: spec.query_name.to_string(),
            dimensions: dimensions.clone(),
            statistic: spec.statistic.to_string(),
            period: self.category.period(),
            start_time: scope.start,
            end_time: scope.end,
        };

        let datapoints = self.source.get_statistics(&query).await?;
        let resource_name = self.category.resource_name(resource);

        Ok(datapoints
            .into_iter()
            .filter(|dp| dp.value.is_finite())
            .map(|dp| MetricRecord {
                source: SOURCE.to_string(),
                service: self.category.service().to_string(),
                resource_id: resource.id.clone(),
                resource_name: resource_name.clone(),
                region: scope.region.clone(),
                metric_name: spec.record_name.to_string(),
                metric_unit: spec.unit.to_string(),
                metric_value: dp.value,
                timestamp: dp.timestamp,
                period: self.category.period(),
                statistic: spec.statistic.to_string(),
                dimensions: dimensions.clone(),
                tags: resource.tags.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl ResourceCollector for CatalogCollector {
    fn name(&self) -> &str {
        self.category.service()
    }

    async fn collect(&self, scope: &CollectionScope) -> Result<Vec<MetricRecord>> {
        let resources = self.source.list_resources(self.category).await?;
        let mut records = Vec::new();

        for resource in &resources {
            for spec in self.category.metrics() {
                match self.collect_pair(resource, spec, scope).await {
                    Ok(batch) => records.extend(batch),
                    Err(e) => {
                        warn!(
                            category = %self.category,
                            resource_id = %resource.id,
                            metric = spec.record_name,
                            error = %e,
                            "Failed to query metric, skipping"
                        );
                    }
                }
            }
        }

        debug!(
            category = %self.category,
            resources = resources.len(),
            records = records.len(),
            "Category collected"
        );
        Ok(records)
    }
}
