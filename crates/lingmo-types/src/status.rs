//! Read-only status views for the router and per-model circuits.

use serde::{Deserialize, Serialize};

use crate::model::ModelId;

/// Circuit health of one model, for the management API and CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStatusInfo {
    pub model_id: ModelId,
    /// One of "closed", "open", "half_open".
    pub circuit_state: String,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// Human-readable time since last success (e.g., "2m ago").
    pub last_success_ago: Option<String>,
    /// Seconds until an open circuit admits a probe.
    pub retry_in_secs: Option<u64>,
    pub total_calls: u64,
    pub total_failures: u64,
}

/// Snapshot of the router's process-wide state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterStatus {
    pub active_model_id: Option<ModelId>,
    pub version: u64,
    pub circuits: Vec<CircuitStatusInfo>,
}
