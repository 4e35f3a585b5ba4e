//! Metrics collection for the orchestrator.
//!
//! Counters are plain fields mutated under the coordinator lock alongside
//! the registry they describe; `MetricsSnapshot` is the read-only view
//! handed to callers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::task::AgentId;

/// Monotonic event counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Tasks accepted by `submit`.
    pub submitted: u64,
    /// Tasks that reached Completed.
    pub completed: u64,
    /// Tasks that exhausted their retry budget.
    pub failed: u64,
    /// Tasks cancelled directly or through a dependency.
    pub cancelled: u64,
    /// Submissions rejected by the cycle check.
    pub cycles_rejected: u64,
    /// Tasks that exceeded their execution deadline.
    pub timeouts: u64,
    /// Dispatch attempts deferred by agent concurrency or rate limits.
    pub resource_constraint_hits: u64,
}

/// Per-agent utilization at snapshot time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUtilization {
    pub agent: AgentId,
    pub running: usize,
    pub max_concurrent: usize,
    pub utilization_percent: f64,
    /// Dispatches within the trailing rate window.
    pub requests_last_minute: usize,
}

/// Point-in-time view of the orchestrator's counters and load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub counters: Metrics,
    /// Distribution of live registry entries by state label.
    pub states: HashMap<String, usize>,
    pub agents: Vec<AgentUtilization>,
}
