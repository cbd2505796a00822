//! Cloud metrics collection and anomaly detection
//!
//! This crate provides the core functionality for:
//! - Per-category metric collection from a cloud telemetry source
//! - Feature engineering and isolation-forest anomaly scoring
//! - Static threshold detection
//! - Orchestration of collect, store and detect cycles
//! - Health checks and observability

pub mod anomaly;
pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod upstream;

pub use error::{PulseError, Result};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{PulseMetrics, StructuredLogger};
pub use orchestrator::{
    CycleOutcome, CyclePhase, CycleStats, Orchestrator, OrchestratorBuilder, OrchestratorStatus,
    StartOutcome, TriggerOutcome,
};
