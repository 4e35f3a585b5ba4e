//! Task data model for the orchestration engine.
//!
//! Tasks are opaque units of work submitted by callers. The orchestrator
//! tracks their lifecycle, dependencies, retry budget, and terminal outcome;
//! it never interprets the payload itself.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Unique identifier for a task within an orchestrator.
///
/// Callers supply their own ids at submission; `TaskId::generate` produces
/// a UUID-backed id for callers that do not care about the value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return up to the first 8 characters for display.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(8);
        &self.0[..end]
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of the agent a task is assigned to.
///
/// Agent names are caller-chosen; resources for a name are created lazily
/// on first reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Task status in its lifecycle.
///
/// `Completed`, `Failed`, `Cancelled`, and `TimedOut` are terminal: a task
/// never transitions out of them. A running task may transition back to
/// `Ready` when a failed attempt has retry budget left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TaskState {
    /// Task created but not yet evaluated against its dependencies.
    Pending,
    /// Task is waiting on one or more dependencies to complete.
    WaitingDeps,
    /// All dependencies satisfied; queued for a free execution slot.
    Ready,
    /// Task is currently executing.
    Running,
    /// Task completed successfully.
    Completed,
    /// Task exhausted its retry budget.
    Failed {
        /// Error message from the last attempt.
        error: String,
    },
    /// Task was cancelled, directly or through a dependency.
    Cancelled {
        /// Why the task was cancelled.
        reason: String,
    },
    /// Task exceeded its execution deadline.
    TimedOut {
        /// The deadline that was exceeded.
        limit: Duration,
    },
}

impl Default for TaskState {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskState {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed
                | TaskState::Failed { .. }
                | TaskState::Cancelled { .. }
                | TaskState::TimedOut { .. }
        )
    }

    /// Short label used for metrics distribution keys.
    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::WaitingDeps => "waiting_deps",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed { .. } => "failed",
            TaskState::Cancelled { .. } => "cancelled",
            TaskState::TimedOut { .. } => "timed_out",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Failed { error } => write!(f, "failed: {}", error),
            TaskState::Cancelled { reason } => write!(f, "cancelled: {}", reason),
            TaskState::TimedOut { limit } => write!(f, "timed out after {:?}", limit),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Terminal outcome of a task, stored on the record and broadcast to
/// waiters on the completion channel.
#[derive(Debug, Clone)]
pub enum TaskOutcome<R> {
    Completed(R),
    Failed(String),
    Cancelled(String),
    TimedOut(Duration),
}

impl<R> TaskOutcome<R> {
    /// Convert the outcome into what `wait_for` hands back to the caller.
    pub fn into_result(self) -> Result<R> {
        match self {
            TaskOutcome::Completed(value) => Ok(value),
            TaskOutcome::Failed(error) => Err(Error::Execution(error)),
            TaskOutcome::Cancelled(reason) => Err(Error::Cancelled(reason)),
            TaskOutcome::TimedOut(limit) => Err(Error::TaskTimeout(limit)),
        }
    }
}

/// What a caller hands to `submit`.
///
/// Only the id and payload are required; everything else falls back to the
/// orchestrator's configured defaults.
#[derive(Debug, Clone)]
pub struct TaskSpec<P> {
    pub id: TaskId,
    pub payload: P,
    pub dependencies: Vec<TaskId>,
    pub priority: i32,
    pub timeout: Option<Duration>,
    pub agent: Option<AgentId>,
    pub max_retries: Option<u32>,
}

impl<P> TaskSpec<P> {
    pub fn new(id: impl Into<TaskId>, payload: P) -> Self {
        Self {
            id: id.into(),
            payload,
            dependencies: Vec::new(),
            priority: 0,
            timeout: None,
            agent: None,
            max_retries: None,
        }
    }

    /// Create a spec with a generated id.
    pub fn generated(payload: P) -> Self {
        Self::new(TaskId::generate(), payload)
    }

    /// Declare dependencies this task waits on. Ids that have not been
    /// submitted yet are allowed; the task stays waiting until they are
    /// submitted and complete.
    pub fn depends_on<I, T>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Scheduling priority; higher dispatches first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Execution deadline for this task.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Assign the task to a named agent, subjecting it to that agent's
    /// concurrency and rate limits.
    pub fn agent(mut self, agent: impl Into<AgentId>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// A task record in the orchestrator's registry.
///
/// The registry owns these exclusively; the dependency graph and agent
/// tracker refer to tasks by id only.
pub struct Task<P, R> {
    pub id: TaskId,
    /// Opaque payload handed to the executor on every attempt.
    pub payload: Arc<P>,
    pub state: TaskState,
    pub priority: i32,
    pub timeout: Duration,
    pub agent: Option<AgentId>,
    /// Declared dependency ids (forward references allowed).
    pub dependencies: HashSet<TaskId>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Terminal outcome, once reached.
    pub outcome: Option<TaskOutcome<R>>,
    /// Completion channel waiters subscribe to.
    done_tx: watch::Sender<Option<TaskOutcome<R>>>,
    /// Cancellation handle for the in-flight attempt, while running.
    pub(crate) cancel_token: Option<CancellationToken>,
}

impl<P, R: Clone> Task<P, R> {
    /// Build a registry record from a spec, filling unset fields from the
    /// orchestrator defaults.
    pub fn from_spec(spec: TaskSpec<P>, default_timeout: Duration, default_retries: u32) -> Self {
        let (done_tx, _) = watch::channel(None);
        Self {
            id: spec.id,
            payload: Arc::new(spec.payload),
            state: TaskState::Pending,
            priority: spec.priority,
            timeout: spec.timeout.unwrap_or(default_timeout),
            agent: spec.agent,
            dependencies: spec.dependencies.into_iter().collect(),
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_retries),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            outcome: None,
            done_tx,
            cancel_token: None,
        }
    }

    /// Subscribe to the completion channel. The receiver observes the
    /// outcome even if the task finished before the subscription.
    pub fn subscribe(&self) -> watch::Receiver<Option<TaskOutcome<R>>> {
        self.done_tx.subscribe()
    }

    /// Mark the task ready for dispatch.
    pub fn mark_ready(&mut self) {
        self.state = TaskState::Ready;
    }

    /// Mark the task as waiting on dependencies.
    pub fn mark_waiting(&mut self) {
        self.state = TaskState::WaitingDeps;
    }

    /// Begin an execution attempt, recording the start time and the
    /// cancellation handle for the in-flight work.
    pub fn start(&mut self, token: CancellationToken) {
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
        self.cancel_token = Some(token);
    }

    /// Complete the task with its result.
    pub fn complete(&mut self, value: R) {
        self.state = TaskState::Completed;
        self.fulfill(TaskOutcome::Completed(value));
    }

    /// Fail the task permanently with the last attempt's error.
    pub fn fail(&mut self, error: String) {
        self.state = TaskState::Failed {
            error: error.clone(),
        };
        self.fulfill(TaskOutcome::Failed(error));
    }

    /// Cancel the task, aborting the in-flight attempt if there is one.
    pub fn cancel(&mut self, reason: String) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.state = TaskState::Cancelled {
            reason: reason.clone(),
        };
        self.fulfill(TaskOutcome::Cancelled(reason));
    }

    /// Mark the task as having exceeded its deadline.
    pub fn time_out(&mut self, limit: Duration) {
        self.state = TaskState::TimedOut { limit };
        self.fulfill(TaskOutcome::TimedOut(limit));
    }

    /// Check if the task is in a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether a failed attempt still has retry budget.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    fn fulfill(&mut self, outcome: TaskOutcome<R>) {
        self.completed_at = Some(Utc::now());
        self.cancel_token = None;
        self.outcome = Some(outcome.clone());
        self.done_tx.send_replace(Some(outcome));
    }
}

impl<P, R> std::fmt::Debug for Task<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("agent", &self.agent)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}
