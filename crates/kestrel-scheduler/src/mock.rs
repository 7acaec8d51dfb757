use async_trait::async_trait;
use kestrel_core::{
    EventEmitter, Pod, PodId, PodTerminator, Result, SchedulingEvent, SchedulingEventKind,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// How the mock answers graceful termination requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminationBehavior {
    /// Pods stop immediately
    #[default]
    Immediate,
    /// Pods stop after the given delay
    Delayed(Duration),
    /// Pods never stop on their own
    Hang,
    /// Neither termination nor forced removal ever completes
    Stuck,
}

/// Record of one call made to the terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCall {
    Terminate { pod: PodId, grace_period: Duration },
    ForceRemove { pod: PodId },
}

/// In-memory terminator for tests and for running against a snapshot.
///
/// Records every call; termination timing is controlled by
/// [`TerminationBehavior`].
#[derive(Clone, Default)]
pub struct MockTerminator {
    calls: Arc<RwLock<Vec<TerminationCall>>>,
    behavior: TerminationBehavior,
    gone: Arc<RwLock<HashSet<PodId>>>,
}

impl MockTerminator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: TerminationBehavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    pub async fn calls(&self) -> Vec<TerminationCall> {
        self.calls.read().await.clone()
    }

    /// Pods that were terminated or force-removed
    pub async fn removed(&self) -> Vec<PodId> {
        let mut pods: Vec<PodId> = self.gone.read().await.iter().cloned().collect();
        pods.sort();
        pods
    }

    /// Pods that had to be force-removed
    pub async fn force_removed(&self) -> Vec<PodId> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|call| match call {
                TerminationCall::ForceRemove { pod } => Some(pod.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl PodTerminator for MockTerminator {
    async fn terminate(&self, pod: &Pod, grace_period: Duration) -> Result<()> {
        self.calls.write().await.push(TerminationCall::Terminate {
            pod: pod.id.clone(),
            grace_period,
        });
        debug!("Mock: terminating pod {} (grace {:?})", pod.id, grace_period);

        match self.behavior {
            TerminationBehavior::Immediate => {}
            TerminationBehavior::Delayed(delay) => tokio::time::sleep(delay).await,
            TerminationBehavior::Hang | TerminationBehavior::Stuck => {
                std::future::pending::<()>().await
            }
        }

        self.gone.write().await.insert(pod.id.clone());
        Ok(())
    }

    async fn force_remove(&self, pod: &Pod) -> Result<()> {
        self.calls
            .write()
            .await
            .push(TerminationCall::ForceRemove { pod: pod.id.clone() });
        debug!("Mock: force-removing pod {}", pod.id);
        if self.behavior == TerminationBehavior::Stuck {
            std::future::pending::<()>().await;
        }
        self.gone.write().await.insert(pod.id.clone());
        Ok(())
    }
}

/// Event emitter keeping every event in memory
#[derive(Debug, Default)]
pub struct RecordingEventEmitter {
    events: Mutex<Vec<SchedulingEvent>>,
}

impl RecordingEventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SchedulingEvent> {
        self.events.lock().clone()
    }

    /// Events of one kind, in emission order
    pub fn of_kind(&self, kind: SchedulingEventKind) -> Vec<SchedulingEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

impl EventEmitter for RecordingEventEmitter {
    fn emit(&self, event: SchedulingEvent) {
        debug!("Recorded event {:?} for pod {}", event.kind, event.pod);
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::ResourceQuantities;

    #[tokio::test]
    async fn test_mock_records_calls() {
        let terminator = MockTerminator::new();
        let pod = Pod::new("default/a", ResourceQuantities::default());

        terminator.terminate(&pod, Duration::from_secs(30)).await.unwrap();
        terminator.force_remove(&pod).await.unwrap();

        assert_eq!(terminator.calls().await.len(), 2);
        assert_eq!(terminator.removed().await, vec![PodId::from("default/a")]);
        assert_eq!(terminator.force_removed().await, vec![PodId::from("default/a")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_terminator_times_out() {
        let terminator = MockTerminator::with_behavior(TerminationBehavior::Hang);
        let pod = Pod::new("default/a", ResourceQuantities::default());

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            terminator.terminate(&pod, Duration::from_secs(1)),
        )
        .await;
        assert!(result.is_err());
        assert!(terminator.removed().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_terminator_never_removes() {
        let terminator = MockTerminator::with_behavior(TerminationBehavior::Stuck);
        let pod = Pod::new("default/a", ResourceQuantities::default());

        let forced =
            tokio::time::timeout(Duration::from_secs(5), terminator.force_remove(&pod)).await;
        assert!(forced.is_err());
        assert!(terminator.removed().await.is_empty());
        assert_eq!(terminator.calls().await.len(), 1);
    }

    #[test]
    fn test_recording_emitter() {
        let emitter = RecordingEventEmitter::new();
        emitter.emit(SchedulingEvent::failed_scheduling(PodId::from("default/a"), "none"));
        assert_eq!(emitter.of_kind(SchedulingEventKind::FailedScheduling).len(), 1);
        assert!(emitter.of_kind(SchedulingEventKind::Scheduled).is_empty());
    }
}
