//! Tests for catalog collection
//!
//! A scripted telemetry source stands in for the provider API so listing,
//! per-pair failures and datapoint normalization can be checked offline.

#[cfg(test)]
mod mock_source_tests {
    use crate::collector::{
        default_collectors, CatalogCollector, CollectionScope, ResourceCategory,
        ResourceCollector, StatisticsQuery, TelemetrySource, DAILY_PERIOD_SECS,
    };
    use crate::error::{PulseError, Result};
    use crate::models::{Credentials, Datapoint, ResourceInstance};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Telemetry source answering from fixed tables and recording queries
    #[derive(Default)]
    struct ScriptedSource {
        resources: HashMap<ResourceCategory, Vec<ResourceInstance>>,
        failing_categories: Vec<ResourceCategory>,
        failing_metric: Option<&'static str>,
        values: Vec<f64>,
        queries: Mutex<Vec<StatisticsQuery>>,
    }

    impl ScriptedSource {
        fn with_resources(category: ResourceCategory, resources: Vec<ResourceInstance>) -> Self {
            Self {
                resources: HashMap::from([(category, resources)]),
                values: vec![10.0, 20.0],
                ..Default::default()
            }
        }

        fn queries(&self) -> Vec<StatisticsQuery> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TelemetrySource for ScriptedSource {
        async fn connect(&self, _credentials: &Credentials) -> Result<()> {
            Ok(())
        }

        async fn list_resources(&self, category: ResourceCategory) -> Result<Vec<ResourceInstance>> {
            if self.failing_categories.contains(&category) {
                return Err(PulseError::upstream("telemetry source", "access denied"));
            }
            Ok(self.resources.get(&category).cloned().unwrap_or_default())
        }

        async fn get_statistics(&self, query: &StatisticsQuery) -> Result<Vec<Datapoint>> {
            self.queries.lock().unwrap().push(query.clone());
            if self.failing_metric == Some(query.metric_name.as_str()) {
                return Err(PulseError::upstream("telemetry source", "throttled"));
            }
            let start = Utc.with_ymd_and_hms(2024, 3, 4, 8, 0, 0).unwrap();
            Ok(self
                .values
                .iter()
                .enumerate()
                .map(|(i, value)| Datapoint {
                    timestamp: start + chrono::Duration::minutes(5 * i as i64),
                    value: *value,
                })
                .collect())
        }
    }

    fn instance(id: &str, tags: &[(&str, &str)]) -> ResourceInstance {
        ResourceInstance {
            id: id.to_string(),
            name: None,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn scope() -> CollectionScope {
        let end = Utc.with_ymd_and_hms(2024, 3, 4, 8, 15, 0).unwrap();
        CollectionScope::ending_at(end, Duration::from_secs(15 * 60), "eu-west-1")
    }

    #[test]
    fn test_scope_window() {
        let scope = scope();
        assert_eq!(scope.end - scope.start, chrono::Duration::minutes(15));
        assert_eq!(scope.region, "eu-west-1");
    }

    #[tokio::test]
    async fn test_compute_emits_average_and_maximum() {
        let source = Arc::new(ScriptedSource::with_resources(
            ResourceCategory::Compute,
            vec![instance("i-1", &[("Name", "web-1")]), instance("i-2", &[])],
        ));
        let collector = CatalogCollector::new(ResourceCategory::Compute, source.clone());

        let records = collector.collect(&scope()).await.unwrap();

        // 2 instances x 2 metric specs x 2 datapoints
        assert_eq!(records.len(), 8);
        assert!(records.iter().all(|r| r.service == "ec2" && r.source == "aws"));
        assert!(records.iter().all(|r| r.region == "eu-west-1" && r.period == 300));

        let max: Vec<_> = records
            .iter()
            .filter(|r| r.metric_name == "CPUUtilizationMax")
            .collect();
        assert_eq!(max.len(), 4);
        assert!(max.iter().all(|r| r.statistic == "Maximum"));

        let names: Vec<&str> = records.iter().map(|r| r.resource_name.as_str()).collect();
        assert!(names.contains(&"web-1"));
        assert!(names.contains(&"EC2-i-2"));

        // Both specs query the provider metric name
        assert!(source
            .queries()
            .iter()
            .all(|q| q.metric_name == "CPUUtilization" && q.namespace == "AWS/EC2"));
    }

    #[tokio::test]
    async fn test_failed_pair_is_skipped() {
        let mut source = ScriptedSource::with_resources(
            ResourceCategory::Database,
            vec![instance("orders-db", &[])],
        );
        source.failing_metric = Some("ReadLatency");
        let collector = CatalogCollector::new(ResourceCategory::Database, Arc::new(source));

        let records = collector.collect(&scope()).await.unwrap();

        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|r| r.metric_name != "ReadLatency"));
        assert!(records.iter().all(|r| r.resource_name == "orders-db"));
        assert_eq!(
            records[0].dimensions.get("DBInstanceIdentifier").map(String::as_str),
            Some("orders-db")
        );
    }

    #[tokio::test]
    async fn test_listing_failure_fails_category() {
        let mut source = ScriptedSource::with_resources(ResourceCategory::Functions, vec![]);
        source.failing_categories = vec![ResourceCategory::Functions];
        let collector = CatalogCollector::new(ResourceCategory::Functions, Arc::new(source));

        assert!(collector.collect(&scope()).await.is_err());
    }

    #[tokio::test]
    async fn test_non_finite_datapoints_dropped() {
        let mut source = ScriptedSource::with_resources(
            ResourceCategory::Functions,
            vec![instance("resize-image", &[])],
        );
        source.values = vec![1.0, f64::NAN, f64::INFINITY];
        let collector = CatalogCollector::new(ResourceCategory::Functions, Arc::new(source));

        let records = collector.collect(&scope()).await.unwrap();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.metric_value.is_finite()));

        let invocations = records
            .iter()
            .find(|r| r.metric_name == "Invocations")
            .unwrap();
        assert_eq!(invocations.statistic, "Sum");
    }

    #[tokio::test]
    async fn test_object_storage_daily_with_storage_type() {
        let source = Arc::new(ScriptedSource::with_resources(
            ResourceCategory::ObjectStorage,
            vec![instance("logs-bucket", &[])],
        ));
        let collector = CatalogCollector::new(ResourceCategory::ObjectStorage, source.clone());

        let records = collector.collect(&scope()).await.unwrap();
        assert!(records.iter().all(|r| r.period == DAILY_PERIOD_SECS));

        let size = records
            .iter()
            .find(|r| r.metric_name == "BucketSizeBytes")
            .unwrap();
        assert_eq!(
            size.dimensions.get("StorageType").map(String::as_str),
            Some("StandardStorage")
        );
        assert!(source.queries().iter().all(|q| q.period == DAILY_PERIOD_SECS));
    }

    #[test]
    fn test_default_collectors_cover_every_category() {
        let source: Arc<dyn TelemetrySource> = Arc::new(ScriptedSource::default());
        let names: Vec<String> = default_collectors(source)
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["ec2", "rds", "lambda", "s3"]);
    }
}

#[cfg(test)]
mod http_source_tests {
    use crate::collector::{
        CollectionScope, HttpTelemetrySource, ResourceCategory, StatisticsQuery, TelemetrySource,
    };
    use crate::models::Credentials;
    use crate::upstream::{EndpointRegistry, JsonClient, ServiceEndpoints};
    use std::collections::HashMap;
    use std::time::Duration;

    fn source(url: &str) -> HttpTelemetrySource {
        let endpoints = EndpointRegistry::new(ServiceEndpoints::new(url, url, url).unwrap());
        HttpTelemetrySource::new(JsonClient::new().unwrap(), endpoints)
    }

    #[tokio::test]
    async fn test_gateway_routes() {
        let mut server = mockito::Server::new_async().await;
        let connect = server
            .mock("POST", "/connect")
            .match_body(mockito::Matcher::PartialJson(
                serde_json::json!({"accessKeyId": "AKIA", "region": "us-east-1"}),
            ))
            .with_status(200)
            .with_body(r#"{"connected": true}"#)
            .create_async()
            .await;
        let _list = server
            .mock("GET", "/resources/object_storage")
            .with_status(200)
            .with_body(r#"{"resources": [{"id": "logs-bucket"}]}"#)
            .create_async()
            .await;
        let _stats = server
            .mock("POST", "/statistics")
            .with_status(200)
            .with_body(r#"{"datapoints": [{"timestamp": "2024-03-04T00:00:00Z", "value": 1024.0}]}"#)
            .create_async()
            .await;

        let source = source(&server.url());
        source
            .connect(&Credentials {
                access_key_id: "AKIA".to_string(),
                secret_access_key: "secret".to_string(),
                region: "us-east-1".to_string(),
            })
            .await
            .unwrap();
        connect.assert_async().await;

        let resources = source
            .list_resources(ResourceCategory::ObjectStorage)
            .await
            .unwrap();
        assert_eq!(resources[0].id, "logs-bucket");

        let scope = CollectionScope::last(Duration::from_secs(900), "us-east-1");
        let points = source
            .get_statistics(&StatisticsQuery {
                category: ResourceCategory::ObjectStorage,
                namespace: "AWS/S3".to_string(),
                metric_name: "BucketSizeBytes".to_string(),
                dimensions: HashMap::new(),
                statistic: "Average".to_string(),
                period: 86_400,
                start_time: scope.start,
                end_time: scope.end,
            })
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 1024.0);
    }

    #[tokio::test]
    async fn test_listing_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _list = server
            .mock("GET", "/resources/compute")
            .with_status(403)
            .create_async()
            .await;

        let err = source(&server.url())
            .list_resources(ResourceCategory::Compute)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
