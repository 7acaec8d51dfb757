// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Scheduler error type
#[derive(Error, Debug, Diagnostic)]
pub enum SchedulerError {
    /// No node passed filtering
    #[error("No suitable nodes found for pod {pod_id}: {reason}")]
    #[diagnostic(
        code(scheduler::no_suitable_nodes),
        help("Check node resources, taints, and pod requirements")
    )]
    NoSuitableNodes { pod_id: String, reason: String },

    /// No node offers a feasible victim set
    #[error("Preemption is infeasible for pod {pod_id}: {reason}")]
    #[diagnostic(
        code(scheduler::preemption_infeasible),
        help("Only strictly lower-priority pods are preempted, within their disruption budgets")
    )]
    PreemptionInfeasible { pod_id: String, reason: String },

    /// The node ledger changed between scoring and binding
    #[error("Bind conflict for pod {pod_id} on node {node_id}: {reason}")]
    #[diagnostic(
        code(scheduler::bind_conflict),
        help("Another pod reserved the capacity first; the pod is requeued")
    )]
    BindConflict {
        pod_id: String,
        node_id: String,
        reason: String,
    },

    /// The scheduling attempt was aborted
    #[error("Scheduling of pod {pod_id} was cancelled")]
    #[diagnostic(
        code(scheduler::scheduling_cancelled),
        help("The pod was deleted or the scheduler is shutting down")
    )]
    SchedulingCancelled { pod_id: String },

    /// The pod ran out of scheduling attempts
    #[error("Pod {pod_id} exhausted {attempts} scheduling attempts")]
    #[diagnostic(
        code(scheduler::backoff_exhausted),
        help("The pod stays Pending until the cluster changes; raise backoff.max_attempts")
    )]
    BackoffExhausted { pod_id: String, attempts: u32 },

    /// Core error
    #[error("Core error: {0}")]
    #[diagnostic(code(scheduler::core_error), help("This is an internal error"))]
    CoreError(#[from] kestrel_core::KestrelError),

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(scheduler::internal_error),
        help("This is likely a bug. Please report it")
    )]
    InternalError { message: String },
}

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

impl SchedulerError {
    /// Create a NoSuitableNodes error
    pub fn no_suitable_nodes(pod_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NoSuitableNodes {
            pod_id: pod_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a PreemptionInfeasible error
    pub fn preemption_infeasible(pod_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PreemptionInfeasible {
            pod_id: pod_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a BindConflict error
    pub fn bind_conflict(
        pod_id: impl Into<String>,
        node_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::BindConflict {
            pod_id: pod_id.into(),
            node_id: node_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a SchedulingCancelled error
    pub fn scheduling_cancelled(pod_id: impl Into<String>) -> Self {
        Self::SchedulingCancelled {
            pod_id: pod_id.into(),
        }
    }

    /// Create a BackoffExhausted error
    pub fn backoff_exhausted(pod_id: impl Into<String>, attempts: u32) -> Self {
        Self::BackoffExhausted {
            pod_id: pod_id.into(),
            attempts,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the pod should be retried later with backoff. A missing
    /// node is retryable: a pinned pod may name a node not yet known.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoSuitableNodes { .. }
                | Self::PreemptionInfeasible { .. }
                | Self::BindConflict { .. }
                | Self::CoreError(kestrel_core::KestrelError::NodeNotFound { .. })
        )
    }
}
