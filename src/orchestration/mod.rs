//! Orchestration layer of the conductor engine.
//!
//! This module wires the scheduler loop, execution wrapper, per-agent
//! resource tracking, metrics, and optional load-adaptive throttling behind
//! the `Orchestrator` façade.

pub mod adaptive;
pub mod agents;
pub mod executor;
pub mod metrics;
mod orchestrator;
mod scheduler;

pub use adaptive::{ResourceUsage, UsageFeed};
pub use agents::{AgentLimits, AgentTracker};
pub use executor::{ExecOutcome, TaskExecutor, TaskFuture};
pub use metrics::{AgentUtilization, Metrics, MetricsSnapshot};
pub use orchestrator::{Orchestrator, TaskSnapshot};
