//! Telemetry source backed by an HTTP gateway in front of the provider API

use super::{ResourceCategory, StatisticsQuery, TelemetrySource};
use crate::error::Result;
use crate::models::{Credentials, Datapoint, ResourceInstance};
use crate::upstream::{names, EndpointRegistry, JsonClient};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Deserialize)]
struct ResourceList {
    #[serde(default)]
    resources: Vec<ResourceInstance>,
}

#[derive(Deserialize)]
struct StatisticsResponse {
    #[serde(default)]
    datapoints: Vec<Datapoint>,
}

#[derive(Deserialize)]
struct ConnectResponse {}

/// Gateway routes: `POST /connect`, `GET /resources/{category}`, `POST /statistics`
pub struct HttpTelemetrySource {
    client: JsonClient,
    endpoints: EndpointRegistry,
}

impl HttpTelemetrySource {
    pub fn new(client: JsonClient, endpoints: EndpointRegistry) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl TelemetrySource for HttpTelemetrySource {
    async fn connect(&self, credentials: &Credentials) -> Result<()> {
        let _: ConnectResponse = self
            .client
            .post(
                &self.endpoints.telemetry(),
                "/connect",
                credentials,
                names::TELEMETRY,
            )
            .await?;
        Ok(())
    }

    async fn list_resources(&self, category: ResourceCategory) -> Result<Vec<ResourceInstance>> {
        let list: ResourceList = self
            .client
            .get(
                &self.endpoints.telemetry(),
                &format!("/resources/{}", category),
                names::TELEMETRY,
            )
            .await?;
        Ok(list.resources)
    }

    async fn get_statistics(&self, query: &StatisticsQuery) -> Result<Vec<Datapoint>> {
        let response: StatisticsResponse = self
            .client
            .post(
                &self.endpoints.telemetry(),
                "/statistics",
                query,
                names::TELEMETRY,
            )
            .await?;
        Ok(response.datapoints)
    }
}
