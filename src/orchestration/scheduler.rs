//! Scheduler loop for dependency-aware task dispatch.
//!
//! One control task drains the ready queue, admits work against the global
//! and per-agent limits, spawns workers, and folds every terminal transition
//! back into the shared state: dependents are re-evaluated, failed attempts
//! are retried or cascaded, and slots are returned. All shared mutation
//! happens under a single coordinator lock; task bodies run outside it.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::OrchestratorConfig;
use crate::core::dag::DepGraph;
use crate::core::task::{Task, TaskId, TaskState};
use crate::orchestration::adaptive::{AdaptiveGovernor, UsageFeed};
use crate::orchestration::agents::AgentTracker;
use crate::orchestration::executor::{run_attempt, ExecOutcome, TaskExecutor};
use crate::orchestration::metrics::Metrics;
use crate::{clog_debug, clog_trace, clog_warn};

/// Upper bound on how long the loop sleeps between dispatch passes when no
/// completion signal arrives.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Entry in the ready queue. Higher priority dispatches first; equal
/// priorities dispatch in submission order.
#[derive(Debug, Clone)]
pub(crate) struct ReadyEntry {
    pub priority: i32,
    pub seq: u64,
    pub id: TaskId,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Shared coordinator state: the task registry, dependency graph, ready
/// queue, agent tracker, and metrics, guarded together by one lock so
/// dependent re-evaluation is atomic with the transition that triggers it.
pub(crate) struct CoreState<P, R> {
    pub tasks: HashMap<TaskId, Task<P, R>>,
    pub graph: DepGraph,
    pub ready: BinaryHeap<ReadyEntry>,
    pub agents: AgentTracker,
    pub metrics: Metrics,
    /// Tasks currently running, across all agents.
    pub running: usize,
    seq: u64,
}

impl<P, R: Clone> CoreState<P, R> {
    pub fn new(agents: AgentTracker) -> Self {
        Self {
            tasks: HashMap::new(),
            graph: DepGraph::new(),
            ready: BinaryHeap::new(),
            agents,
            metrics: Metrics::default(),
            running: 0,
            seq: 0,
        }
    }

    /// Queue a task for dispatch.
    pub fn push_ready(&mut self, id: TaskId, priority: i32) {
        self.seq += 1;
        self.ready.push(ReadyEntry {
            priority,
            seq: self.seq,
            id,
        });
    }

    /// Whether every dependency of the task is registered and Completed.
    pub fn deps_satisfied(&self, id: &TaskId) -> bool {
        self.graph.dependencies_of(id).iter().all(|dep| {
            self.tasks
                .get(dep)
                .map(|t| t.state == TaskState::Completed)
                .unwrap_or(false)
        })
    }

    /// Return the slots taken when the task was dispatched. Called exactly
    /// once per attempt, when its completion signal arrives.
    pub fn release_dispatch(&mut self, id: &TaskId) {
        self.running = self.running.saturating_sub(1);
        if let Some(agent) = self.tasks.get(id).and_then(|t| t.agent.clone()) {
            self.agents.release(&agent);
        }
    }
}

/// Cancel every transitive dependent of `root` that has not already
/// finished, and optionally `root` itself. One reverse traversal per
/// terminal transition; diamond-shaped dependents are cancelled once.
pub(crate) fn cancel_with_dependents<P, R: Clone>(
    state: &mut CoreState<P, R>,
    root: &TaskId,
    root_reason: Option<&str>,
    dependent_reason: &str,
) {
    if let Some(reason) = root_reason {
        if let Some(task) = state.tasks.get_mut(root) {
            if !task.is_finished() {
                task.cancel(reason.to_string());
                state.metrics.cancelled += 1;
            }
        }
    }

    for id in state.graph.transitive_dependents(root) {
        if let Some(task) = state.tasks.get_mut(&id) {
            if !task.is_finished() {
                clog_trace!("cancelling task {}: {}", id, dependent_reason);
                task.cancel(dependent_reason.to_string());
                state.metrics.cancelled += 1;
            }
        }
    }
}

/// Move every dependent of a completed task whose dependencies are now all
/// satisfied from WaitingDeps into the ready queue.
fn promote_dependents<P, R: Clone>(state: &mut CoreState<P, R>, completed: &TaskId) {
    for id in state.graph.dependents_of(completed) {
        if !state.deps_satisfied(&id) {
            continue;
        }
        let promoted = match state.tasks.get_mut(&id) {
            Some(task) if task.state == TaskState::WaitingDeps => {
                task.mark_ready();
                Some(task.priority)
            }
            _ => None,
        };
        if let Some(priority) = promoted {
            clog_trace!("task {} ready", id);
            state.push_ready(id, priority);
        }
    }
}

/// Messages driving the scheduler loop.
pub(crate) enum SchedulerSignal<R> {
    /// A worker finished one attempt.
    Finished { id: TaskId, outcome: ExecOutcome<R> },
    /// A retry backoff timer elapsed; the task may be queued again.
    Requeue { id: TaskId },
    /// Something was submitted; run a dispatch pass promptly.
    Wake,
}

/// The coordinator's control loop.
pub(crate) struct Scheduler<P, R> {
    state: Arc<RwLock<CoreState<P, R>>>,
    executor: Arc<dyn TaskExecutor<P, R>>,
    config: OrchestratorConfig,
    governor: AdaptiveGovernor,
    usage_feed: Option<Arc<dyn UsageFeed>>,
    signal_tx: mpsc::Sender<SchedulerSignal<R>>,
    signal_rx: mpsc::Receiver<SchedulerSignal<R>>,
    shutdown: CancellationToken,
}

impl<P, R> Scheduler<P, R>
where
    P: Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: Arc<RwLock<CoreState<P, R>>>,
        executor: Arc<dyn TaskExecutor<P, R>>,
        config: OrchestratorConfig,
        usage_feed: Option<Arc<dyn UsageFeed>>,
        signal_tx: mpsc::Sender<SchedulerSignal<R>>,
        signal_rx: mpsc::Receiver<SchedulerSignal<R>>,
        shutdown: CancellationToken,
    ) -> Self {
        let governor = AdaptiveGovernor::new(config.adaptive.clone(), config.max_concurrent_tasks);
        Self {
            state,
            executor,
            config,
            governor,
            usage_feed,
            signal_tx,
            signal_rx,
            shutdown,
        }
    }

    /// Run until the shutdown token fires.
    ///
    /// Every wake starts with a dispatch pass, then waits on the next
    /// completion signal or the poll interval, whichever comes first, so
    /// deferred tasks and adaptive checks are revisited without unbounded
    /// blocking.
    pub async fn run(mut self) {
        clog_debug!("scheduler loop started");
        let mut tick = tokio::time::interval(POLL_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            self.dispatch_ready().await;

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                signal = self.signal_rx.recv() => match signal {
                    Some(SchedulerSignal::Finished { id, outcome }) => {
                        self.handle_finished(id, outcome).await;
                    }
                    Some(SchedulerSignal::Requeue { id }) => self.handle_requeue(id).await,
                    Some(SchedulerSignal::Wake) => {}
                    None => break,
                },
                _ = tick.tick() => self.sample_usage().await,
            }
        }
        clog_debug!("scheduler loop stopped");
    }

    /// Pop ready tasks and launch workers while slots are available.
    ///
    /// A task denied by its agent's limits is deferred to a later pass and
    /// does not block other queued tasks.
    async fn dispatch_ready(&mut self) {
        let mut launches = Vec::new();
        {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let limit = self.governor.effective_limit();
            let mut deferred = Vec::new();

            while state.running < limit {
                let Some(entry) = state.ready.pop() else { break };

                // Entries are validated lazily; anything no longer Ready
                // (cancelled, already re-queued) is dropped here.
                let (agent, timeout, payload) = match state.tasks.get(&entry.id) {
                    Some(task) if task.state == TaskState::Ready => {
                        (task.agent.clone(), task.timeout, Arc::clone(&task.payload))
                    }
                    _ => continue,
                };

                if let Some(agent) = agent.as_ref() {
                    if !state.agents.try_admit(agent) {
                        state.metrics.resource_constraint_hits += 1;
                        clog_trace!("agent {} at capacity, deferring task {}", agent, entry.id);
                        deferred.push(entry);
                        continue;
                    }
                }

                state.running += 1;
                let token = self.shutdown.child_token();
                if let Some(task) = state.tasks.get_mut(&entry.id) {
                    task.start(token.clone());
                }
                launches.push((entry.id, payload, timeout, token));
            }

            for entry in deferred {
                state.ready.push(entry);
            }
        }

        // Workers run outside the coordinator lock.
        for (id, payload, timeout, token) in launches {
            clog_debug!("dispatching task {}", id);
            let executor = Arc::clone(&self.executor);
            let tx = self.signal_tx.clone();
            tokio::spawn(async move {
                let outcome = run_attempt(&*executor, payload, timeout, &token).await;
                let _ = tx.send(SchedulerSignal::Finished { id, outcome }).await;
            });
        }
    }

    /// Fold a worker's outcome into the shared state. Dependent
    /// re-evaluation and cascades happen under the same lock acquisition as
    /// the terminal transition itself.
    async fn handle_finished(&mut self, id: TaskId, outcome: ExecOutcome<R>) {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        state.release_dispatch(&id);

        // A task cancelled mid-flight already holds its terminal state; only
        // the slots needed returning.
        if state.tasks.get(&id).map(|t| t.is_finished()).unwrap_or(true) {
            return;
        }

        match outcome {
            ExecOutcome::Success(value) => {
                if let Some(task) = state.tasks.get_mut(&id) {
                    task.complete(value);
                }
                state.metrics.completed += 1;
                clog_debug!("task {} completed", id);
                promote_dependents(state, &id);
            }
            ExecOutcome::Error(error) => self.handle_attempt_error(state, &id, error),
            ExecOutcome::DeadlineExceeded(limit) => {
                if let Some(task) = state.tasks.get_mut(&id) {
                    task.time_out(limit);
                }
                state.metrics.timeouts += 1;
                clog_warn!("task {} exceeded its {:?} deadline", id, limit);
                cancel_with_dependents(
                    state,
                    &id,
                    None,
                    &format!("dependency {} timed out", id),
                );
            }
            ExecOutcome::Cancelled => {
                // Reached only when the token fired without a terminal state
                // being recorded first; the early return above covers the
                // normal cancel path.
            }
        }
    }

    /// Retry a failed attempt if budget remains, otherwise fail the task
    /// and cascade-cancel its dependents. Timeouts never take this path.
    fn handle_attempt_error(&self, state: &mut CoreState<P, R>, id: &TaskId, error: String) {
        let retry = match state.tasks.get_mut(id) {
            Some(task) if task.can_retry() => {
                task.retry_count += 1;
                task.mark_ready();
                Some((task.retry_count, task.priority))
            }
            Some(task) => {
                task.fail(error.clone());
                None
            }
            None => return,
        };

        match retry {
            Some((attempt, priority)) => {
                let delay = self.config.retry_delay_for(attempt);
                clog_debug!(
                    "task {} attempt {} failed, retrying in {:?}: {}",
                    id,
                    attempt,
                    delay,
                    error
                );
                if delay.is_zero() {
                    state.push_ready(id.clone(), priority);
                } else {
                    // The backoff sleeps in a detached timer so the
                    // coordinator lock is never held while waiting.
                    let tx = self.signal_tx.clone();
                    let id = id.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(SchedulerSignal::Requeue { id }).await;
                    });
                }
            }
            None => {
                state.metrics.failed += 1;
                clog_warn!("task {} failed permanently: {}", id, error);
                cancel_with_dependents(
                    state,
                    id,
                    None,
                    &format!("dependency {} failed: {}", id, error),
                );
            }
        }
    }

    /// A backoff timer elapsed; queue the task again unless it was
    /// cancelled in the meantime.
    async fn handle_requeue(&mut self, id: TaskId) {
        let mut state = self.state.write().await;
        let priority = match state.tasks.get(&id) {
            Some(task) if task.state == TaskState::Ready => Some(task.priority),
            _ => None,
        };
        if let Some(priority) = priority {
            state.push_ready(id, priority);
        }
    }

    async fn sample_usage(&mut self) {
        let Some(feed) = self.usage_feed.as_ref() else {
            return;
        };
        if !self.config.adaptive.enabled {
            return;
        }
        let usage = feed.sample();
        let before = self.governor.effective_limit();
        let after = self.governor.observe(usage);
        if after != before {
            clog_debug!(
                "adaptive limit {} -> {} (cpu {:.1}%, mem {:.1}%)",
                before,
                after,
                usage.cpu_percent,
                usage.memory_percent
            );
        }
    }
}
