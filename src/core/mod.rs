//! Core domain models for the conductor orchestration engine.
//!
//! This module contains the fundamental data structures used throughout
//! the engine: task records, identifiers, and the dependency graph.

pub mod dag;
pub mod task;

pub use dag::DepGraph;
pub use task::{AgentId, Task, TaskId, TaskOutcome, TaskSpec, TaskState};
