//! Per-agent resource tracking.
//!
//! Each agent has a concurrency cap and a sliding-window request-rate limit.
//! Records are created lazily on first reference, using the shared defaults
//! unless an override was registered for that agent. Memory budgets are
//! carried but advisory only.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::core::task::AgentId;
use crate::orchestration::metrics::AgentUtilization;

/// Trailing interval the request-rate limit counts over.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Limits applied to a single agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLimits {
    /// Maximum tasks the agent runs at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Maximum dispatches within the trailing rate window.
    #[serde(default = "default_max_rpm")]
    pub max_requests_per_minute: usize,
    /// Advisory memory budget; not enforced.
    #[serde(default = "default_memory_budget")]
    pub memory_budget_mb: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            max_requests_per_minute: default_max_rpm(),
            memory_budget_mb: default_memory_budget(),
        }
    }
}

fn default_max_concurrent() -> usize {
    3
}

fn default_max_rpm() -> usize {
    60
}

fn default_memory_budget() -> u64 {
    512
}

/// Live resource state for one agent.
#[derive(Debug)]
struct AgentSlots {
    limits: AgentLimits,
    running: usize,
    /// Dispatch timestamps within the rate window, oldest first.
    window: VecDeque<Instant>,
}

impl AgentSlots {
    fn new(limits: AgentLimits) -> Self {
        Self {
            limits,
            running: 0,
            window: VecDeque::new(),
        }
    }

    fn prune(&mut self, window: Duration) {
        let now = Instant::now();
        while let Some(front) = self.window.front() {
            if now.duration_since(*front) >= window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Tracks concurrency and request rates for every referenced agent.
pub struct AgentTracker {
    defaults: AgentLimits,
    overrides: HashMap<AgentId, AgentLimits>,
    agents: HashMap<AgentId, AgentSlots>,
    window: Duration,
}

impl AgentTracker {
    pub fn new(defaults: AgentLimits) -> Self {
        Self::with_window(defaults, RATE_WINDOW)
    }

    /// Tracker with a custom rate window. Used by tests to exercise window
    /// expiry without waiting a minute.
    pub fn with_window(defaults: AgentLimits, window: Duration) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            agents: HashMap::new(),
            window,
        }
    }

    /// Register limit overrides for an agent. Existing live state keeps its
    /// running count and window but adopts the new limits.
    pub fn set_limits(&mut self, agent: AgentId, limits: AgentLimits) {
        if let Some(slots) = self.agents.get_mut(&agent) {
            slots.limits = limits.clone();
        }
        self.overrides.insert(agent, limits);
    }

    /// Limits that apply to the agent: its override, else the defaults.
    pub fn limits_for(&self, agent: &AgentId) -> &AgentLimits {
        self.overrides.get(agent).unwrap_or(&self.defaults)
    }

    /// Try to take a slot for the agent.
    ///
    /// Returns `false` without side effects when the agent is at its
    /// concurrency cap or its rate window is full; otherwise counts the
    /// dispatch and returns `true`.
    pub fn try_admit(&mut self, agent: &AgentId) -> bool {
        let limits = self.limits_for(agent).clone();
        let window = self.window;
        let slots = self
            .agents
            .entry(agent.clone())
            .or_insert_with(|| AgentSlots::new(limits));
        slots.prune(window);

        if slots.running >= slots.limits.max_concurrent {
            return false;
        }
        if slots.window.len() >= slots.limits.max_requests_per_minute {
            return false;
        }

        slots.running += 1;
        slots.window.push_back(Instant::now());
        true
    }

    /// Return a slot taken by `try_admit`. Saturates at zero.
    pub fn release(&mut self, agent: &AgentId) {
        if let Some(slots) = self.agents.get_mut(agent) {
            slots.running = slots.running.saturating_sub(1);
        }
    }

    /// Current running count for an agent.
    pub fn running(&self, agent: &AgentId) -> usize {
        self.agents.get(agent).map(|s| s.running).unwrap_or(0)
    }

    /// Utilization report for every agent referenced so far, sorted by name.
    pub fn utilization(&mut self) -> Vec<AgentUtilization> {
        let window = self.window;
        let mut report: Vec<AgentUtilization> = self
            .agents
            .iter_mut()
            .map(|(agent, slots)| {
                slots.prune(window);
                let percent = if slots.limits.max_concurrent == 0 {
                    0.0
                } else {
                    slots.running as f64 / slots.limits.max_concurrent as f64 * 100.0
                };
                AgentUtilization {
                    agent: agent.clone(),
                    running: slots.running,
                    max_concurrent: slots.limits.max_concurrent,
                    utilization_percent: percent,
                    requests_last_minute: slots.window.len(),
                }
            })
            .collect();
        report.sort_by(|a, b| a.agent.cmp(&b.agent));
        report
    }
}

impl std::fmt::Debug for AgentTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTracker")
            .field("agents", &self.agents.len())
            .field("overrides", &self.overrides.len())
            .finish()
    }
}
