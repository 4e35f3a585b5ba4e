//! Load-aware throttling of the dispatch limit.
//!
//! The caller may supply a usage feed reporting system load; when enabled,
//! the scheduler steps its effective concurrency limit down while load is
//! above the configured high-water marks and back up once it recedes. The
//! committed dependency graph and task states are never touched.

use serde::{Deserialize, Serialize};

use crate::config::AdaptiveConfig;

/// A point-in-time load reading from the caller's environment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Source of load readings. Absence of a feed disables adaptive scheduling.
pub trait UsageFeed: Send + Sync {
    fn sample(&self) -> ResourceUsage;
}

impl<F> UsageFeed for F
where
    F: Fn() -> ResourceUsage + Send + Sync,
{
    fn sample(&self) -> ResourceUsage {
        self()
    }
}

/// Tracks the effective concurrency limit against the configured maximum.
#[derive(Debug)]
pub struct AdaptiveGovernor {
    config: AdaptiveConfig,
    configured: usize,
    effective: usize,
}

impl AdaptiveGovernor {
    pub fn new(config: AdaptiveConfig, configured: usize) -> Self {
        Self {
            config,
            configured,
            effective: configured,
        }
    }

    /// The limit dispatch should use right now.
    pub fn effective_limit(&self) -> usize {
        self.effective
    }

    /// Fold a load reading into the effective limit, one step at a time.
    /// Returns the limit after the adjustment.
    pub fn observe(&mut self, usage: ResourceUsage) -> usize {
        if !self.config.enabled {
            return self.effective;
        }

        let floor = self.config.min_concurrency.max(1).min(self.configured);
        let overloaded = usage.cpu_percent > self.config.cpu_high_water
            || usage.memory_percent > self.config.memory_high_water;

        if overloaded {
            if self.effective > floor {
                self.effective -= 1;
            }
        } else if self.effective < self.configured {
            self.effective += 1;
        }

        self.effective
    }
}
