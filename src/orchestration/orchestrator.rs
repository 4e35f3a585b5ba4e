//! Public façade for the task-orchestration engine.
//!
//! An `Orchestrator` owns the task registry, dependency graph, agent
//! tracker, and metrics behind one coordinator lock, and drives a scheduler
//! loop on the tokio runtime. Callers submit opaque payloads with
//! dependency, priority, timeout, and agent hints, then await results
//! through `wait_for`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use futures::FutureExt;
//! use conductor::{Orchestrator, OrchestratorConfig, TaskSpec};
//!
//! let orchestrator = Orchestrator::new(OrchestratorConfig::default(), |n: Arc<u32>| {
//!     async move { Ok(*n * 2) }.boxed()
//! });
//! orchestrator.start().await?;
//! let id = orchestrator.submit(TaskSpec::new("double-21", 21)).await?;
//! let answer = orchestrator.wait_for(&id, None).await?;
//! orchestrator.stop().await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::core::task::{AgentId, Task, TaskId, TaskSpec, TaskState};
use crate::orchestration::adaptive::UsageFeed;
use crate::orchestration::agents::{AgentLimits, AgentTracker};
use crate::orchestration::executor::TaskExecutor;
use crate::orchestration::metrics::MetricsSnapshot;
use crate::orchestration::scheduler::{
    cancel_with_dependents, CoreState, Scheduler, SchedulerSignal,
};
use crate::{clog, clog_debug, clog_warn, Error, Result};

/// Capacity of the signal channel between workers and the scheduler loop.
const SIGNAL_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

struct Lifecycle<R> {
    phase: Phase,
    signal_rx: Option<mpsc::Receiver<SchedulerSignal<R>>>,
    handle: Option<JoinHandle<()>>,
}

/// Read-only projection of a task's registry record.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub state: TaskState,
    pub priority: i32,
    pub agent: Option<AgentId>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub dependencies: Vec<TaskId>,
    pub dependents: Vec<TaskId>,
}

/// Coordinates submission, scheduling, execution, and completion of
/// dependent tasks.
///
/// Generic over the opaque payload type `P` and the executor's result type
/// `R`. The engine never inspects payloads; results are cloned into every
/// waiter.
pub struct Orchestrator<P, R> {
    config: OrchestratorConfig,
    state: Arc<RwLock<CoreState<P, R>>>,
    executor: Arc<dyn TaskExecutor<P, R>>,
    usage_feed: Option<Arc<dyn UsageFeed>>,
    signal_tx: mpsc::Sender<SchedulerSignal<R>>,
    lifecycle: Mutex<Lifecycle<R>>,
    shutdown: CancellationToken,
}

impl<P, R> Orchestrator<P, R>
where
    P: Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Create an orchestrator with the given configuration and executor.
    ///
    /// Nothing runs until `start` is called; submissions made before that
    /// are queued and dispatched once the loop is up.
    pub fn new(config: OrchestratorConfig, executor: impl TaskExecutor<P, R> + 'static) -> Self {
        let mut agents = AgentTracker::new(config.agent_defaults.clone());
        for (name, limits) in &config.agent_overrides {
            agents.set_limits(AgentId::new(name.clone()), limits.clone());
        }

        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        Self {
            state: Arc::new(RwLock::new(CoreState::new(agents))),
            executor: Arc::new(executor),
            usage_feed: None,
            signal_tx,
            lifecycle: Mutex::new(Lifecycle {
                phase: Phase::Created,
                signal_rx: Some(signal_rx),
                handle: None,
            }),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    /// Attach a load feed enabling adaptive throttling (when the config's
    /// adaptive section is enabled).
    pub fn with_usage_feed(mut self, feed: impl UsageFeed + 'static) -> Self {
        self.usage_feed = Some(Arc::new(feed));
        self
    }

    /// Spawn the scheduler loop. Idempotent while running; starting a
    /// stopped orchestrator is an error.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.phase {
            Phase::Running => Ok(()),
            Phase::Stopped => Err(Error::Stopped),
            Phase::Created => {
                if let Some(signal_rx) = lifecycle.signal_rx.take() {
                    let scheduler = Scheduler::new(
                        Arc::clone(&self.state),
                        Arc::clone(&self.executor),
                        self.config.clone(),
                        self.usage_feed.clone(),
                        self.signal_tx.clone(),
                        signal_rx,
                        self.shutdown.clone(),
                    );
                    lifecycle.handle = Some(tokio::spawn(scheduler.run()));
                }
                lifecycle.phase = Phase::Running;
                clog!("orchestrator started");
                Ok(())
            }
        }
    }

    /// Cancel every unfinished task, halt the scheduler loop, and wait for
    /// it to wind down. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let handle = {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.phase == Phase::Stopped {
                return Ok(());
            }
            lifecycle.phase = Phase::Stopped;
            lifecycle.handle.take()
        };

        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let open: Vec<TaskId> = state
                .tasks
                .iter()
                .filter(|(_, task)| !task.is_finished())
                .map(|(id, _)| id.clone())
                .collect();
            for id in open {
                if let Some(task) = state.tasks.get_mut(&id) {
                    task.cancel("orchestrator stopped".to_string());
                    state.metrics.cancelled += 1;
                }
            }
            state.ready.clear();
        }

        self.shutdown.cancel();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        clog!("orchestrator stopped");
        Ok(())
    }

    /// Whether the scheduler loop is up.
    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.phase == Phase::Running
    }

    /// Register a task.
    ///
    /// Dependencies may reference ids that have not been submitted yet; the
    /// task waits until they are submitted and complete. A submission whose
    /// edges would close a cycle is rejected whole, leaving the registry
    /// untouched. Duplicate ids are rejected.
    pub async fn submit(&self, spec: TaskSpec<P>) -> Result<TaskId> {
        {
            let lifecycle = self.lifecycle.lock().await;
            if lifecycle.phase == Phase::Stopped {
                return Err(Error::Stopped);
            }
        }

        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if state.tasks.contains_key(&spec.id) {
            return Err(Error::Validation(format!(
                "duplicate task id: {}",
                spec.id
            )));
        }

        // Nodes for the task and any forward-referenced dependencies; fresh
        // nodes are rolled back if the proposed edges would close a cycle.
        let mut created = Vec::new();
        if state.graph.insert(&spec.id) {
            created.push(spec.id.clone());
        }
        for dep in &spec.dependencies {
            if state.graph.insert(dep) {
                created.push(dep.clone());
            }
        }

        if let Err(err) = state.graph.connect_all(&spec.dependencies, &spec.id) {
            for id in created {
                state.graph.remove(&id);
            }
            state.metrics.cycles_rejected += 1;
            clog_warn!("submission of task {} rejected: {}", spec.id, err);
            return Err(err);
        }

        let id = spec.id.clone();
        let mut task = Task::from_spec(
            spec,
            self.config.default_timeout(),
            self.config.default_max_retries,
        );
        state.metrics.submitted += 1;

        // A dependency that already reached a dead end cancels the newcomer
        // immediately, the same outcome a live dependent receives when its
        // dependency fails.
        let dead_dep = task
            .dependencies
            .iter()
            .find(|dep| {
                state
                    .tasks
                    .get(dep)
                    .map(|t| t.is_finished() && t.state != TaskState::Completed)
                    .unwrap_or(false)
            })
            .cloned();
        if let Some(dep) = dead_dep {
            clog_debug!("task {} cancelled at submit: dependency {} is dead", id, dep);
            task.cancel(format!("dependency {} did not complete", dep));
            state.metrics.cancelled += 1;
            state.tasks.insert(id.clone(), task);
            return Ok(id);
        }

        let satisfied = task.dependencies.iter().all(|dep| {
            state
                .tasks
                .get(dep)
                .map(|t| t.state == TaskState::Completed)
                .unwrap_or(false)
        });
        if satisfied {
            task.mark_ready();
            let priority = task.priority;
            state.tasks.insert(id.clone(), task);
            state.push_ready(id.clone(), priority);
            // Nudge the loop so fresh work does not wait out a poll tick.
            let _ = self.signal_tx.try_send(SchedulerSignal::Wake);
        } else {
            task.mark_waiting();
            state.tasks.insert(id.clone(), task);
        }

        clog_debug!("task {} submitted", id);
        Ok(id)
    }

    /// Await a task's terminal outcome.
    ///
    /// Returns the stored result, or the task's own error (execution
    /// failure, deadline, cancellation). If `timeout` elapses before the
    /// task finishes, the caller gets a wait-timeout error while the task
    /// keeps running.
    pub async fn wait_for(&self, id: &TaskId, timeout: Option<Duration>) -> Result<R> {
        let mut rx = {
            let state = self.state.read().await;
            let task = state
                .tasks
                .get(id)
                .ok_or_else(|| Error::UnknownTask(id.clone()))?;
            task.subscribe()
        };

        // The coordinator lock is not held while suspended here.
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx.wait_for(|v| v.is_some())).await {
                Ok(Ok(value)) => value.as_ref().cloned(),
                Ok(Err(_)) => None,
                Err(_) => return Err(Error::WaitTimeout(limit)),
            },
            None => match rx.wait_for(|v| v.is_some()).await {
                Ok(value) => value.as_ref().cloned(),
                Err(_) => None,
            },
        };

        match outcome {
            Some(outcome) => outcome.into_result(),
            None => Err(Error::Cancelled("completion channel closed".to_string())),
        }
    }

    /// Cancel a task and all of its transitive dependents.
    ///
    /// An in-flight execution is aborted best-effort through its
    /// cancellation token. Returns `false` only when the id is unknown;
    /// cancelling an already-finished task is a no-op that returns `true`.
    pub async fn cancel(&self, id: &TaskId) -> bool {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if !state.tasks.contains_key(id) {
            return false;
        }
        clog_debug!("cancelling task {} and its dependents", id);
        cancel_with_dependents(
            state,
            id,
            Some("cancelled by caller"),
            &format!("dependency {} was cancelled", id),
        );
        true
    }

    /// Read-only snapshot of a task, or `None` for unknown ids.
    pub async fn status(&self, id: &TaskId) -> Option<TaskSnapshot> {
        let state = self.state.read().await;
        let task = state.tasks.get(id)?;
        Some(TaskSnapshot {
            id: task.id.clone(),
            state: task.state.clone(),
            priority: task.priority,
            agent: task.agent.clone(),
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            dependencies: state.graph.dependencies_of(id),
            dependents: state.graph.dependents_of(id),
        })
    }

    /// Counters, per-state distribution, and per-agent utilization.
    pub async fn metrics(&self) -> MetricsSnapshot {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let mut states: HashMap<String, usize> = HashMap::new();
        for task in state.tasks.values() {
            *states.entry(task.state.label().to_string()).or_insert(0) += 1;
        }

        MetricsSnapshot {
            counters: state.metrics.clone(),
            states,
            agents: state.agents.utilization(),
        }
    }

    /// Register limit overrides for an agent, replacing the configured
    /// defaults for that name.
    pub async fn register_agent(&self, agent: impl Into<AgentId>, limits: AgentLimits) {
        let mut state = self.state.write().await;
        state.agents.set_limits(agent.into(), limits);
    }

    /// Evict finished tasks whose completion is older than the horizon.
    ///
    /// The registry otherwise retains terminal tasks indefinitely; this is
    /// the manual eviction hook for long-lived coordinators. A completed
    /// task is kept while an unfinished dependent still needs it for its
    /// readiness check. Returns the number of evicted tasks.
    pub async fn prune_finished(&self, older_than: Duration) -> usize {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        let now = Utc::now();

        let eligible: Vec<TaskId> = state
            .tasks
            .iter()
            .filter(|(id, task)| {
                if !task.is_finished() {
                    return false;
                }
                let old_enough = task
                    .completed_at
                    .map(|done| {
                        now.signed_duration_since(done)
                            .to_std()
                            .map(|age| age >= older_than)
                            .unwrap_or(false)
                    })
                    .unwrap_or(false);
                if !old_enough {
                    return false;
                }
                state.graph.dependents_of(id).iter().all(|dependent| {
                    state
                        .tasks
                        .get(dependent)
                        .map(|t| t.is_finished())
                        .unwrap_or(true)
                })
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &eligible {
            state.tasks.remove(id);
            state.graph.remove(id);
        }
        if !eligible.is_empty() {
            clog_debug!("pruned {} finished tasks", eligible.len());
        }
        eligible.len()
    }
}

impl<P, R> Drop for Orchestrator<P, R> {
    fn drop(&mut self) {
        // Detached workers and the loop observe this even if stop() was
        // never awaited.
        self.shutdown.cancel();
    }
}
