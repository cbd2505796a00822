//! Error taxonomy shared by the detection pipeline and the orchestrator

use thiserror::Error;

/// Failures raised inside the pipeline.
///
/// Entry points (`detect`, a collection cycle, the anomaly sweep) convert
/// these into structured results instead of handing them to callers.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PulseError {
    /// Batch is below the minimum size for statistical detection
    #[error("insufficient data points: {actual} provided, {required} required")]
    InsufficientData { required: usize, actual: usize },

    /// Missing or invalid credentials or collaborator endpoint
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A collaborator call failed (timeout, non-success response, transport)
    #[error("{collaborator} call failed: {message}")]
    Upstream {
        collaborator: &'static str,
        message: String,
    },

    /// Unexpected failure during feature building or scoring
    #[error("computation error: {0}")]
    Computation(String),
}

impl PulseError {
    pub fn upstream(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            collaborator,
            message: message.into(),
        }
    }

    pub fn timeout(collaborator: &'static str, after: std::time::Duration) -> Self {
        Self::upstream(
            collaborator,
            format!("timed out after {}ms", after.as_millis()),
        )
    }
}

pub type Result<T> = std::result::Result<T, PulseError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_messages() {
        let err = PulseError::InsufficientData {
            required: 10,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "insufficient data points: 3 provided, 10 required"
        );

        let err = PulseError::timeout("persistence sink", Duration::from_secs(30));
        assert_eq!(
            err.to_string(),
            "persistence sink call failed: timed out after 30000ms"
        );
    }
}
