use crate::error::{EvictionError, Result};
use kestrel_core::{NodeId, PodId, Taint};
use std::fmt;
use tokio::time::Instant;

/// Identity of an eviction timer: one pod on one node, for one taint key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    pub pod: PodId,
    pub node: NodeId,
    pub taint_key: String,
}

impl TimerKey {
    pub fn new(pod: PodId, node: NodeId, taint_key: impl Into<String>) -> Self {
        Self {
            pod,
            node,
            taint_key: taint_key.into(),
        }
    }
}

impl fmt::Display for TimerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.pod, self.node, self.taint_key)
    }
}

/// Lifecycle of one eviction timer.
///
/// `Armed` moves to exactly one of `Cancelled` or `Fired`; both are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Armed,
    Cancelled,
    Fired,
}

impl TimerState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TimerState::Armed)
    }

    /// Validate and perform a transition
    pub fn transition(self, key: &TimerKey, to: TimerState) -> Result<TimerState> {
        match (self, to) {
            (TimerState::Armed, TimerState::Cancelled) | (TimerState::Armed, TimerState::Fired) => {
                Ok(to)
            }
            (from, to) => Err(EvictionError::invalid_transition(
                key.to_string(),
                from.to_string(),
                to.to_string(),
            )),
        }
    }
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimerState::Armed => "Armed",
            TimerState::Cancelled => "Cancelled",
            TimerState::Fired => "Fired",
        };
        write!(f, "{}", s)
    }
}

/// Point-in-time view of a timer, as returned by
/// [`EvictionHandle::timers`](crate::EvictionHandle::timers)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerInfo {
    pub key: TimerKey,
    pub taint: Taint,
    pub state: TimerState,
    /// When the manager observed the taint becoming effective
    pub armed_at: Instant,
    pub deadline: Instant,
}
