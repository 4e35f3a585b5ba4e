use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestration::agents::AgentLimits;
use crate::{clog_debug, Error, Result};

/// Thresholds for load-aware throttling of the dispatch limit.
///
/// When enabled, the scheduler samples the caller-supplied usage feed and
/// steps the effective concurrency limit down while either reading is above
/// its high-water mark. Purely advisory: task states and committed
/// dependencies are never touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_high_water")]
    pub cpu_high_water: f64,
    #[serde(default = "default_high_water")]
    pub memory_high_water: f64,
    /// Floor the effective limit never drops below.
    #[serde(default = "default_min_concurrency")]
    pub min_concurrency: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cpu_high_water: default_high_water(),
            memory_high_water: default_high_water(),
            min_concurrency: default_min_concurrency(),
        }
    }
}

/// Configuration for an orchestrator instance.
///
/// All fields have sane defaults; a config can be built in code via
/// `Default` or loaded from `~/.conductor/conductor.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks running at once, across all agents.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    /// Execution deadline applied to tasks that do not set their own.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Retry budget applied to tasks that do not set their own.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Base delay before a failed attempt is re-queued.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    /// Double the retry delay on each successive attempt.
    #[serde(default = "default_true")]
    pub exponential_backoff: bool,
    /// Limits applied to agents without a registered override.
    #[serde(default)]
    pub agent_defaults: AgentLimits,
    /// Per-agent limit overrides, keyed by agent name.
    #[serde(default)]
    pub agent_overrides: HashMap<String, AgentLimits>,
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            default_timeout_secs: default_timeout_secs(),
            default_max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            exponential_backoff: true,
            agent_defaults: AgentLimits::default(),
            agent_overrides: HashMap::new(),
            adaptive: AdaptiveConfig::default(),
        }
    }
}

fn default_max_concurrent() -> usize {
    8
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_high_water() -> f64 {
    85.0
}

fn default_min_concurrency() -> usize {
    1
}

impl OrchestratorConfig {
    pub fn conductor_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".conductor"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::conductor_dir()?.join("conductor.toml"))
    }

    /// Default per-task execution deadline.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Delay before re-queueing the given retry attempt (1-based).
    ///
    /// With exponential backoff the base delay doubles per attempt; the
    /// exponent is capped so the delay cannot overflow.
    pub fn retry_delay_for(&self, attempt: u32) -> Duration {
        if self.retry_delay_secs == 0 {
            return Duration::ZERO;
        }
        let factor = if self.exponential_backoff {
            1u64 << attempt.saturating_sub(1).min(10)
        } else {
            1
        };
        Duration::from_secs(self.retry_delay_secs.saturating_mul(factor))
    }

    /// Load config from the default path, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load config from an explicit path, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        clog_debug!("OrchestratorConfig::load path={}", path.display());
        if !path.exists() {
            clog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        clog_debug!(
            "Config loaded: max_concurrent={}, default_timeout={}s, agents={}",
            config.max_concurrent_tasks,
            config.default_timeout_secs,
            config.agent_overrides.len()
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::conductor_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        clog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}
