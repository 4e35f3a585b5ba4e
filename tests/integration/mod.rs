//! Integration test suite for the conductor orchestration engine.
//!
//! These tests exercise the full submit → schedule → execute → complete
//! path with real executors on the tokio runtime, including dependency
//! ordering, resource limits, retries, timeouts, and cascading
//! cancellation.
//!
//! # Test Categories
//!
//! - `dag_execution`: dependency ordering and parallel throughput
//! - `resource_limits`: global and per-agent admission control
//! - `failure_handling`: retries, permanent failures, deadlines
//! - `cancellation`: explicit cancel, cascades, and shutdown
//!
//! Executor durations are tens of milliseconds with generous assertion
//! margins, so the suite is safe on loaded CI machines.

mod fixtures;

mod dag_execution;
mod failure_handling;
