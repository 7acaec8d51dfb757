use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Filter plugins that can be switched on and off. Explicit node pinning is
/// not a plugin: it always runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FilterPlugin {
    Unschedulable,
    ResourceFit,
    TaintToleration,
    NodeAffinity,
}

impl FilterPlugin {
    pub const ALL: [FilterPlugin; 4] = [
        FilterPlugin::Unschedulable,
        FilterPlugin::ResourceFit,
        FilterPlugin::TaintToleration,
        FilterPlugin::NodeAffinity,
    ];
}

/// Score plugins that can be switched on and off
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScorePlugin {
    LeastAllocated,
    BalancedAllocation,
    ImageLocality,
    NodeAffinity,
    TaintToleration,
}

impl ScorePlugin {
    pub const ALL: [ScorePlugin; 5] = [
        ScorePlugin::LeastAllocated,
        ScorePlugin::BalancedAllocation,
        ScorePlugin::ImageLocality,
        ScorePlugin::NodeAffinity,
        ScorePlugin::TaintToleration,
    ];

    pub fn default_weight(self) -> i64 {
        match self {
            ScorePlugin::TaintToleration => 3,
            ScorePlugin::NodeAffinity => 2,
            _ => 1,
        }
    }
}

/// Enabled/disabled plugin sets
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginConfig {
    /// Start from an empty plugin set instead of the defaults
    pub disable_defaults: bool,
    pub enabled_filters: Vec<FilterPlugin>,
    pub disabled_filters: Vec<FilterPlugin>,
    pub enabled_scores: Vec<ScorePlugin>,
    pub disabled_scores: Vec<ScorePlugin>,
    /// Score weight overrides
    pub weights: BTreeMap<ScorePlugin, i64>,
}

impl PluginConfig {
    /// Configuration with every default plugin disabled
    pub fn none() -> Self {
        Self {
            disable_defaults: true,
            ..Default::default()
        }
    }

    /// Filter plugins in evaluation order
    pub fn resolve_filters(&self) -> Vec<FilterPlugin> {
        FilterPlugin::ALL
            .into_iter()
            .filter(|p| {
                (!self.disable_defaults || self.enabled_filters.contains(p))
                    && !self.disabled_filters.contains(p)
            })
            .collect()
    }

    /// Score plugins with their weights. Plugins weighted zero are dropped.
    pub fn resolve_scores(&self) -> Vec<(ScorePlugin, i64)> {
        ScorePlugin::ALL
            .into_iter()
            .filter(|p| {
                (!self.disable_defaults || self.enabled_scores.contains(p))
                    && !self.disabled_scores.contains(p)
            })
            .map(|p| (p, self.weights.get(&p).copied().unwrap_or(p.default_weight())))
            .filter(|(_, weight)| *weight != 0)
            .collect()
    }
}

/// Per-pod retry backoff
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt
    pub initial: Duration,
    /// Upper bound for the doubling delay
    pub max: Duration,
    /// Attempts after which a pod is parked until the cluster changes
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            max_attempts: 10,
        }
    }
}

/// Victim termination timing
#[derive(Debug, Clone)]
pub struct PreemptionConfig {
    /// Grace period handed to the terminator; after it expires the victim
    /// is force-removed
    pub termination_grace: Duration,
    /// Extra time the preemptor waits beyond the grace period
    pub wait_slack: Duration,
}

impl Default for PreemptionConfig {
    fn default() -> Self {
        Self {
            termination_grace: Duration::from_secs(30),
            wait_slack: Duration::from_secs(5),
        }
    }
}

impl PreemptionConfig {
    /// Upper bound on how long a preemptor waits for its victims
    pub fn max_wait(&self) -> Duration {
        self.termination_grace + self.wait_slack
    }
}

/// Configuration for the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between scheduling cycles
    pub schedule_interval: Duration,
    /// Pods evaluated concurrently per cycle
    pub parallelism: usize,
    /// Immediate re-evaluations after losing a bind race
    pub bind_retry_limit: u32,
    pub backoff: BackoffConfig,
    pub preemption: PreemptionConfig,
    pub profile: PluginConfig,
    /// Capacity of the binding broadcast channel
    pub binding_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_interval: Duration::from_secs(1),
            parallelism: 16,
            bind_retry_limit: 3,
            backoff: BackoffConfig::default(),
            preemption: PreemptionConfig::default(),
            profile: PluginConfig::default(),
            binding_capacity: 1024,
        }
    }
}
