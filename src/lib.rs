//! conductor — asynchronous task orchestration over a dependency DAG.
//!
//! Callers submit opaque units of work with dependency, priority, timeout,
//! and agent hints; the engine resolves dependencies as a directed acyclic
//! graph, dispatches ready work under global and per-agent limits, retries
//! and times out attempts, and cascades failure or cancellation through
//! dependents. Results are delivered through per-task completion handles.

pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;

pub use crate::config::{AdaptiveConfig, OrchestratorConfig};
pub use crate::core::{AgentId, DepGraph, Task, TaskId, TaskOutcome, TaskSpec, TaskState};
pub use crate::error::{Error, Result};
pub use crate::orchestration::{
    AgentLimits, AgentUtilization, Metrics, MetricsSnapshot, Orchestrator, ResourceUsage,
    TaskExecutor, TaskFuture, TaskSnapshot, UsageFeed,
};
