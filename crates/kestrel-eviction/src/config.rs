use std::time::Duration;

/// Configuration for the eviction manager
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    /// Grace for pods with no toleration at all for the not-ready taint
    pub default_not_ready_toleration: Duration,
    /// Grace for pods with no toleration at all for the unreachable taint
    pub default_unreachable_toleration: Duration,
    /// Capacity of the command channel
    pub command_buffer: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            default_not_ready_toleration: Duration::from_secs(300),
            default_unreachable_toleration: Duration::from_secs(300),
            command_buffer: 1024,
        }
    }
}
