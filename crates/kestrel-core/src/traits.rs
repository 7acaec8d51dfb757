use crate::error::Result;
use crate::events::SchedulingEvent;
use crate::snapshot::ClusterSnapshot;
use crate::types::Pod;
use async_trait::async_trait;
use std::time::Duration;

/// Source of cluster state
///
/// The engine never collects state itself; it consumes whatever snapshot
/// the provider hands it.
#[async_trait]
pub trait ClusterStateProvider: Send + Sync {
    /// Read-only snapshot of nodes, pods and disruption budgets
    async fn snapshot(&self) -> Result<ClusterSnapshot>;
}

/// Termination callback for running pods
#[async_trait]
pub trait PodTerminator: Send + Sync {
    /// Ask for graceful termination. Resolves once the pod is gone or the
    /// request failed; callers bound the wait themselves.
    async fn terminate(&self, pod: &Pod, grace_period: Duration) -> Result<()>;

    /// Remove the pod immediately, without waiting for it to stop
    async fn force_remove(&self, pod: &Pod) -> Result<()>;
}

/// Sink for structured scheduling, eviction and preemption events
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: SchedulingEvent);
}
