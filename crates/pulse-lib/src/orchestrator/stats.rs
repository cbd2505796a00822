//! Cycle counters and phase shared between the loop and status queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Where the orchestrator is within a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    #[default]
    Idle,
    Collecting,
    Storing,
    Detecting,
    Error,
}

/// Process-wide collection counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub total_collections: u64,
    pub successful_collections: u64,
    pub failed_collections: u64,
    pub last_error: Option<String>,
    pub last_collection_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct StatsState {
    stats: CycleStats,
    phase: CyclePhase,
}

/// Lock-guarded stats; readers always get a whole snapshot
#[derive(Debug, Clone, Default)]
pub struct StatsHandle {
    inner: Arc<RwLock<StatsState>>,
}

impl StatsHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn write<F: FnOnce(&mut StatsState)>(&self, f: F) {
        let mut state = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state);
    }

    pub fn snapshot(&self) -> CycleStats {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .stats
            .clone()
    }

    pub fn phase(&self) -> CyclePhase {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .phase
    }

    pub fn set_phase(&self, phase: CyclePhase) {
        self.write(|s| s.phase = phase);
    }

    /// Error phase resets to idle; any other phase is left alone
    pub fn clear_error(&self) -> bool {
        let mut cleared = false;
        self.write(|s| {
            if s.phase == CyclePhase::Error {
                s.phase = CyclePhase::Idle;
                cleared = true;
            }
        });
        cleared
    }

    /// A cycle passed the session gate
    pub fn begin_cycle(&self) {
        self.write(|s| {
            s.stats.total_collections += 1;
            s.phase = CyclePhase::Collecting;
        });
    }

    /// Batch stored (or nothing to store)
    pub fn record_success(&self) {
        self.write(|s| s.stats.successful_collections += 1);
    }

    pub fn record_failure(&self, error: &str) {
        self.write(|s| {
            s.stats.failed_collections += 1;
            s.stats.last_error = Some(error.to_string());
            s.phase = CyclePhase::Error;
        });
    }

    /// A cycle that never started: only the error is kept
    pub fn record_aborted(&self, error: &str) {
        self.write(|s| {
            s.stats.last_error = Some(error.to_string());
            s.phase = CyclePhase::Error;
        });
    }

    pub fn finish_cycle(&self, at: DateTime<Utc>) {
        self.write(|s| {
            s.stats.last_collection_time = Some(at);
            s.phase = CyclePhase::Idle;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_cycle_counts() {
        let stats = StatsHandle::new();
        stats.begin_cycle();
        assert_eq!(stats.phase(), CyclePhase::Collecting);
        stats.record_success();
        let now = Utc::now();
        stats.finish_cycle(now);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_collections, 1);
        assert_eq!(snapshot.successful_collections, 1);
        assert_eq!(snapshot.failed_collections, 0);
        assert_eq!(snapshot.last_collection_time, Some(now));
        assert_eq!(stats.phase(), CyclePhase::Idle);
    }

    #[test]
    fn test_failure_sets_error_phase() {
        let stats = StatsHandle::new();
        stats.begin_cycle();
        stats.record_failure("persistence sink call failed: 503");

        assert_eq!(stats.phase(), CyclePhase::Error);
        assert!(stats.clear_error());
        assert!(!stats.clear_error());
        assert_eq!(stats.phase(), CyclePhase::Idle);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.failed_collections, 1);
        assert_eq!(snapshot.last_collection_time, None);
    }

    #[test]
    fn test_aborted_cycle_keeps_counters() {
        let stats = StatsHandle::new();
        stats.record_aborted("configuration error: no credentials");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_collections, 0);
        assert_eq!(snapshot.failed_collections, 0);
        assert!(snapshot.last_error.is_some());
    }

    #[test]
    fn test_stats_wire_format() {
        let json = serde_json::to_value(StatsHandle::new().snapshot()).unwrap();
        assert_eq!(json["totalCollections"], 0);
        assert!(json["lastError"].is_null());
        assert_eq!(serde_json::to_value(CyclePhase::Detecting).unwrap(), "detecting");
    }
}
