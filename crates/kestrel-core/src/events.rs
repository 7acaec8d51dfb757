use crate::types::{NodeId, PodId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of scheduling event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingEventKind {
    Scheduled,
    FailedScheduling,
    Preempted,
    PreemptionInfeasible,
    EvictionArmed,
    EvictionCancelled,
    Evicted,
}

/// A structured scheduling, eviction or preemption event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingEvent {
    /// Unique event id
    pub uid: Uuid,
    pub kind: SchedulingEventKind,
    /// Pod the event is about
    pub pod: PodId,
    /// Node involved, if any
    pub node: Option<NodeId>,
    /// Short machine-readable reason (e.g. "TaintManagerEviction")
    pub reason: String,
    /// Human-readable detail
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SchedulingEvent {
    fn new(
        kind: SchedulingEventKind,
        pod: PodId,
        node: Option<NodeId>,
        reason: &str,
        message: String,
    ) -> Self {
        Self {
            uid: Uuid::new_v4(),
            kind,
            pod,
            node,
            reason: reason.to_string(),
            message,
            timestamp: Utc::now(),
        }
    }

    /// Pod bound to a node
    pub fn scheduled(pod: PodId, node: NodeId, score: i64) -> Self {
        let message = format!("Successfully assigned {} to {} (score {})", pod, node, score);
        Self::new(SchedulingEventKind::Scheduled, pod, Some(node), "Scheduled", message)
    }

    /// No node was eligible
    pub fn failed_scheduling(pod: PodId, message: impl Into<String>) -> Self {
        Self::new(
            SchedulingEventKind::FailedScheduling,
            pod,
            None,
            "FailedScheduling",
            message.into(),
        )
    }

    /// `victim` is evicted on `node` to make room for `preemptor`
    pub fn preempted(victim: PodId, node: NodeId, preemptor: &PodId) -> Self {
        let message = format!("Preempted by {} on node {}", preemptor, node);
        Self::new(SchedulingEventKind::Preempted, victim, Some(node), "Preempted", message)
    }

    /// No node offers a feasible victim set
    pub fn preemption_infeasible(pod: PodId, message: impl Into<String>) -> Self {
        Self::new(
            SchedulingEventKind::PreemptionInfeasible,
            pod,
            None,
            "PreemptionInfeasible",
            message.into(),
        )
    }

    /// An eviction timer has been armed
    pub fn eviction_armed(pod: PodId, node: NodeId, taint: &str, delay_secs: u64) -> Self {
        let message = format!(
            "Marking for deletion in {}s: taint {} is not tolerated",
            delay_secs, taint
        );
        Self::new(
            SchedulingEventKind::EvictionArmed,
            pod,
            Some(node),
            "TaintManagerEviction",
            message,
        )
    }

    /// An eviction timer has been cancelled
    pub fn eviction_cancelled(pod: PodId, node: NodeId, taint: &str) -> Self {
        let message = format!("Cancelling deletion: taint {} no longer applies", taint);
        Self::new(
            SchedulingEventKind::EvictionCancelled,
            pod,
            Some(node),
            "TaintManagerEviction",
            message,
        )
    }

    /// A pod was evicted by an expired timer
    pub fn evicted(pod: PodId, node: NodeId, taint: &str) -> Self {
        let message = format!("Evicted from {}: taint {} is not tolerated", node, taint);
        Self::new(
            SchedulingEventKind::Evicted,
            pod,
            Some(node),
            "TaintManagerEviction",
            message,
        )
    }
}
