//! Kestrel Eviction - NoExecute taint eviction timers
//!
//! This crate provides:
//! - A single-task manager owning every eviction timer
//! - The timer state machine (Armed, then Cancelled or Fired)
//! - Mapping of node conditions to not-ready/unreachable taints

pub mod conditions;
pub mod config;
pub mod error;
pub mod manager;
pub mod timer;

// Re-export commonly used types
pub use conditions::{condition_taints, effective_taints};
pub use config::EvictionConfig;
pub use error::{EvictionError, Result};
pub use manager::{EvictedPod, EvictionHandle, EvictionManager};
pub use timer::{TimerInfo, TimerKey, TimerState};
