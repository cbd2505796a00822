//! Agent configuration
//!
//! Values come from an optional TOML file (`pulse.toml`, or the path in
//! `PULSE_CONFIG`) overlaid by `PULSE_`-prefixed environment variables,
//! e.g. `PULSE_API_PORT=9000` or `PULSE_DETECTION=remote`.

use anyhow::{bail, Context, Result};
use pulse_lib::anomaly::ScorerConfig;
use pulse_lib::orchestrator::{interval_from_minutes, OrchestratorSettings, MAX_INTERVAL_MINUTES};
use pulse_lib::upstream::{ServiceEndpoints, DEFAULT_REGION};
use pulse_lib::Credentials;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Where per-cycle detection runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// In-process isolation forest
    #[default]
    Local,
    /// The AI service's detection endpoint
    Remote,
}

impl std::fmt::Display for DetectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMode::Local => write!(f, "local"),
            DetectionMode::Remote => write!(f, "remote"),
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Instance label attached to structured log events
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Control, health and metrics API port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Node service (credential store and metrics history)
    #[serde(default = "default_node_service_url")]
    pub node_service_url: String,

    /// AI service (remote detection and anomaly monitoring)
    #[serde(default = "default_ai_service_url")]
    pub ai_service_url: String,

    /// Telemetry gateway in front of the provider API
    #[serde(default = "default_telemetry_url")]
    pub telemetry_url: String,

    #[serde(default = "default_collection_interval")]
    pub collection_interval_minutes: u64,

    #[serde(default = "default_anomaly_check_interval")]
    pub anomaly_check_interval_minutes: u64,

    /// Scheduler polling resolution
    #[serde(default = "default_tick")]
    pub tick_secs: u64,

    #[serde(default = "default_lookback")]
    pub lookback_minutes: u64,

    #[serde(default = "default_collector_timeout")]
    pub collector_timeout_secs: u64,

    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,

    #[serde(default = "default_detect_timeout")]
    pub detect_timeout_secs: u64,

    #[serde(default = "default_sweep_timeout")]
    pub sweep_timeout_secs: u64,

    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,

    /// Start the collection loop at boot
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,

    #[serde(default)]
    pub detection: DetectionMode,

    #[serde(default = "default_contamination")]
    pub contamination: f64,

    #[serde(default = "default_n_estimators")]
    pub n_estimators: usize,

    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Static credentials; when absent they are fetched from the node service
    #[serde(default)]
    pub aws_access_key_id: Option<String>,
    #[serde(default)]
    pub aws_secret_access_key: Option<String>,
    #[serde(default)]
    pub aws_region: Option<String>,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "cloud-pulse".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_node_service_url() -> String {
    "http://node-service:3000".to_string()
}

fn default_ai_service_url() -> String {
    "http://ai-service:9000".to_string()
}

fn default_telemetry_url() -> String {
    "http://telemetry-gateway:8600".to_string()
}

fn default_collection_interval() -> u64 {
    5
}

fn default_anomaly_check_interval() -> u64 {
    15
}

fn default_tick() -> u64 {
    60
}

fn default_lookback() -> u64 {
    15
}

fn default_collector_timeout() -> u64 {
    60
}

fn default_store_timeout() -> u64 {
    30
}

fn default_detect_timeout() -> u64 {
    60
}

fn default_sweep_timeout() -> u64 {
    120
}

fn default_alert_threshold() -> f64 {
    0.8
}

fn default_auto_start() -> bool {
    true
}

fn default_contamination() -> f64 {
    pulse_lib::anomaly::DEFAULT_CONTAMINATION
}

fn default_n_estimators() -> usize {
    ScorerConfig::default().n_estimators
}

fn default_random_seed() -> u64 {
    ScorerConfig::default().seed
}

impl AgentConfig {
    /// Load configuration from `PULSE_CONFIG` (or `pulse.toml`) and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var("PULSE_CONFIG").ok();
        Self::load_from(file.as_deref().map(Path::new), None)
    }

    /// Load from an explicit file and, for tests, an explicit environment map
    pub fn load_from(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        builder = match file {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name("pulse").required(false)),
        };

        let config = builder
            .add_source(
                config::Environment::with_prefix("PULSE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .context("Failed to read configuration")?;

        let agent: AgentConfig = config
            .try_deserialize()
            .context("Failed to parse configuration")?;
        agent.validate()?;
        Ok(agent)
    }

    fn validate(&self) -> Result<()> {
        interval_from_minutes("collection_interval_minutes", self.collection_interval_minutes)?;
        interval_from_minutes(
            "anomaly_check_interval_minutes",
            self.anomaly_check_interval_minutes,
        )?;
        if self.lookback_minutes > MAX_INTERVAL_MINUTES {
            bail!("lookback_minutes must be at most {}", MAX_INTERVAL_MINUTES);
        }
        for (name, value) in [
            ("tick_secs", self.tick_secs),
            ("collector_timeout_secs", self.collector_timeout_secs),
            ("store_timeout_secs", self.store_timeout_secs),
            ("detect_timeout_secs", self.detect_timeout_secs),
            ("sweep_timeout_secs", self.sweep_timeout_secs),
        ] {
            if value == 0 {
                bail!("{} must be at least 1", name);
            }
        }
        if !(0.0..=1.0).contains(&self.alert_threshold) {
            bail!("alert_threshold must be within [0, 1]");
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            bail!("contamination must be within (0, 0.5]");
        }
        if self.n_estimators == 0 {
            bail!("n_estimators must be at least 1");
        }
        if self.aws_access_key_id.is_some() != self.aws_secret_access_key.is_some() {
            bail!("aws_access_key_id and aws_secret_access_key must be set together");
        }
        self.endpoints()?;
        Ok(())
    }

    pub fn endpoints(&self) -> Result<ServiceEndpoints> {
        ServiceEndpoints::new(
            &self.node_service_url,
            &self.ai_service_url,
            &self.telemetry_url,
        )
        .context("Invalid service endpoint")
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            collection_interval: Duration::from_secs(self.collection_interval_minutes.saturating_mul(60)),
            sweep_interval: Duration::from_secs(self.anomaly_check_interval_minutes.saturating_mul(60)),
            tick: Duration::from_secs(self.tick_secs),
            lookback: Duration::from_secs(self.lookback_minutes.saturating_mul(60)),
            collector_timeout: Duration::from_secs(self.collector_timeout_secs),
            store_timeout: Duration::from_secs(self.store_timeout_secs),
            detect_timeout: Duration::from_secs(self.detect_timeout_secs),
            sweep_timeout: Duration::from_secs(self.sweep_timeout_secs),
            alert_threshold: self.alert_threshold,
            ..OrchestratorSettings::default()
        }
    }

    pub fn scorer(&self) -> ScorerConfig {
        ScorerConfig {
            contamination: self.contamination,
            n_estimators: self.n_estimators,
            seed: self.random_seed,
            ..ScorerConfig::default()
        }
    }

    pub fn static_credentials(&self) -> Option<Credentials> {
        Some(Credentials {
            access_key_id: self.aws_access_key_id.clone()?,
            secret_access_key: self.aws_secret_access_key.clone()?,
            region: self
                .aws_region
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
        })
    }
}
