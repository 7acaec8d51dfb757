use crate::conditions::effective_taints;
use crate::config::EvictionConfig;
use crate::error::{EvictionError, Result};
use crate::timer::{TimerInfo, TimerKey, TimerState};
use futures_util::StreamExt;
use kestrel_core::{
    EventEmitter, Node, NodeId, Pod, PodId, PodPhase, PodTerminator, SchedulingEvent, Taint,
    TAINT_NODE_NOT_READY, TAINT_NODE_UNREACHABLE,
};
use kestrel_scheduler::toleration::{no_execute_tolerance, Tolerance};
use kestrel_scheduler::{BindingEvent, SharedState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, info, warn};

/// A pod removed from its node by an expired timer
#[derive(Debug, Clone)]
pub struct EvictedPod {
    pub pod: Pod,
    pub node: NodeId,
    /// Taint whose timer expired
    pub taint: Taint,
}

enum Command {
    PodBound { pod: Pod, node: NodeId },
    PodUpdated { pod: Pod },
    PodDeleted { pod: PodId },
    Timers { reply: oneshot::Sender<Vec<TimerInfo>> },
}

/// Cloneable handle feeding the eviction manager.
///
/// Pod updates go through one queue, so the manager sees them in the order
/// they were sent. Taints are not sent here: they live in the cluster
/// state's taint index, which the manager watches.
#[derive(Clone)]
pub struct EvictionHandle {
    tx: mpsc::Sender<Command>,
    state: SharedState,
}

impl EvictionHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| EvictionError::ManagerStopped)
    }

    /// Derive the node's taints from its conditions and store them in the
    /// cluster state. Returns the taints that were applied.
    pub fn node_status(&self, node: &Node) -> Vec<Taint> {
        let taints = effective_taints(node);
        let delta = self.state.set_node_taints(&node.id, taints.clone());
        debug!("Node {} condition taints applied: {:?}", node.id, delta);
        taints
    }

    /// A pod started running on `node`
    pub async fn pod_bound(&self, pod: Pod, node: NodeId) -> Result<()> {
        self.send(Command::PodBound { pod, node }).await
    }

    /// A running pod changed, e.g. its tolerations
    pub async fn pod_updated(&self, pod: Pod) -> Result<()> {
        self.send(Command::PodUpdated { pod }).await
    }

    /// A pod was deleted or left its node
    pub async fn pod_deleted(&self, pod: PodId) -> Result<()> {
        self.send(Command::PodDeleted { pod }).await
    }

    /// All timers the manager knows, in key order
    pub async fn timers(&self) -> Result<Vec<TimerInfo>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Timers { reply }).await?;
        rx.await.map_err(|_| EvictionError::ManagerStopped)
    }

    /// Timers still counting down
    pub async fn armed(&self) -> Result<Vec<TimerInfo>> {
        Ok(self
            .timers()
            .await?
            .into_iter()
            .filter(|t| !t.state.is_terminal())
            .collect())
    }
}

struct TimerEntry {
    taint: Taint,
    state: TimerState,
    armed_at: Instant,
    deadline: Instant,
    slot: Option<delay_queue::Key>,
}

/// Owns every eviction timer.
///
/// The manager is a single task: commands, state notifications and timer
/// expiries are handled one at a time, so a timer is cancelled or fired,
/// never both. NoExecute taints are read from the cluster state's taint
/// index; the manager only keeps the pods it tracks.
pub struct EvictionManager {
    config: EvictionConfig,
    state: SharedState,
    terminator: Arc<dyn PodTerminator>,
    events: Arc<dyn EventEmitter>,
    commands: mpsc::Receiver<Command>,
    bindings: broadcast::Receiver<BindingEvent>,
    no_execute: broadcast::Receiver<NodeId>,
    evicted: mpsc::Sender<EvictedPod>,
    pods: HashMap<PodId, Pod>,
    timers: HashMap<TimerKey, TimerEntry>,
    queue: DelayQueue<TimerKey>,
}

impl EvictionManager {
    /// Create a manager together with its handle and the receiver of
    /// evicted pods. The manager subscribes to `state` right away, so no
    /// binding or taint change made after this call is missed.
    pub fn new(
        config: EvictionConfig,
        state: SharedState,
        terminator: Arc<dyn PodTerminator>,
        events: Arc<dyn EventEmitter>,
    ) -> (Self, EvictionHandle, mpsc::Receiver<EvictedPod>) {
        let buffer = config.command_buffer.max(1);
        let (tx, commands) = mpsc::channel(buffer);
        let (evicted, evicted_rx) = mpsc::channel(buffer);

        let manager = Self {
            config,
            bindings: state.subscribe_bindings(),
            no_execute: state.subscribe_no_execute(),
            state: state.clone(),
            terminator,
            events,
            commands,
            evicted,
            pods: HashMap::new(),
            timers: HashMap::new(),
            queue: DelayQueue::new(),
        };
        (manager, EvictionHandle { tx, state }, evicted_rx)
    }

    /// Run until `token` is cancelled or every handle is dropped.
    ///
    /// Pods already bound in the cluster state are picked up on start.
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        info!(
            "Starting eviction manager (not-ready grace: {:?}, unreachable grace: {:?})",
            self.config.default_not_ready_toleration, self.config.default_unreachable_toleration
        );
        self.resync();

        loop {
            // state notifications first: a command sent after a state
            // change must see that change
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Eviction manager shutting down");
                    return Ok(());
                }
                changed = self.no_execute.recv() => match changed {
                    Ok(node) => self.reconcile_node(&node),
                    Err(RecvError::Lagged(n)) => {
                        warn!("Missed {} taint change(s), reconciling every pod", n);
                        self.reconcile_all();
                    }
                    Err(RecvError::Closed) => {
                        info!("Cluster state dropped, stopping eviction manager");
                        return Ok(());
                    }
                },
                event = self.bindings.recv() => match event {
                    Ok(BindingEvent::Bound { pod, node }) => self.track(pod, node),
                    Ok(BindingEvent::Unbound { pod, .. }) => self.forget(&pod),
                    Err(RecvError::Lagged(n)) => {
                        warn!("Missed {} binding event(s), resyncing from cluster state", n);
                        self.resync();
                    }
                    Err(RecvError::Closed) => {
                        info!("Cluster state dropped, stopping eviction manager");
                        return Ok(());
                    }
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        info!("All eviction handles dropped, stopping eviction manager");
                        return Ok(());
                    }
                },
                Some(expired) = self.queue.next(), if !self.queue.is_empty() => {
                    self.fire(expired.into_inner());
                }
            }
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::PodBound { pod, node } => self.track(pod, node),
            Command::PodUpdated { mut pod } => {
                let bound = self
                    .pods
                    .get(&pod.id)
                    .and_then(|known| known.bound_node.clone())
                    .or_else(|| pod.bound_node.clone());
                let Some(node) = bound else {
                    debug!("Ignoring update of pod {} which is not running", pod.id);
                    return;
                };
                pod.bound_node = Some(node);
                let id = pod.id.clone();
                self.pods.insert(id.clone(), pod);
                self.reconcile_pod(&id);
            }
            Command::PodDeleted { pod } => self.forget(&pod),
            Command::Timers { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn track(&mut self, mut pod: Pod, node: NodeId) {
        debug!("Tracking pod {} on node {}", pod.id, node);
        pod.bound_node = Some(node);
        let id = pod.id.clone();
        self.pods.insert(id.clone(), pod);
        self.reconcile_pod(&id);
    }

    fn forget(&mut self, pod: &PodId) {
        if self.pods.remove(pod).is_some() {
            debug!("Stopped tracking pod {}", pod);
        }
        self.cancel_where(|key| &key.pod == pod);
        self.timers.retain(|key, _| &key.pod != pod);
    }

    /// Rebuild the tracked pods from the cluster state's bound pods.
    ///
    /// Pods the state does not know at all stay tracked. A pod whose timer
    /// already fired on its node is left alone until its eviction lands.
    fn resync(&mut self) {
        let bound: HashMap<PodId, Pod> = self
            .state
            .bound_pods()
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        let stale: Vec<PodId> = self
            .pods
            .keys()
            .filter(|id| !bound.contains_key(*id) && self.state.pod(id).is_some())
            .cloned()
            .collect();
        for id in stale {
            self.forget(&id);
        }

        for (id, pod) in bound {
            let Some(node) = pod.bound_node.clone() else {
                continue;
            };
            if self.fired_on(&id, &node) {
                continue;
            }
            let moved = self
                .pods
                .get(&id)
                .map_or(true, |known| known.bound_node.as_ref() != Some(&node));
            if moved {
                self.pods.insert(id, pod);
            }
        }

        debug!("Resynced {} tracked pod(s)", self.pods.len());
        self.reconcile_all();
    }

    fn fired_on(&self, pod: &PodId, node: &NodeId) -> bool {
        self.timers.iter().any(|(key, entry)| {
            &key.pod == pod && &key.node == node && entry.state == TimerState::Fired
        })
    }

    fn reconcile_node(&mut self, node: &NodeId) {
        let affected: Vec<PodId> = self
            .pods
            .values()
            .filter(|p| p.bound_node.as_ref() == Some(node))
            .map(|p| p.id.clone())
            .collect();
        debug!(
            "NoExecute taints of node {} changed, reconciling {} pod(s)",
            node,
            affected.len()
        );
        for pod in affected {
            self.reconcile_pod(&pod);
        }
    }

    fn reconcile_all(&mut self) {
        let ids: Vec<PodId> = self.pods.keys().cloned().collect();
        for id in ids {
            self.reconcile_pod(&id);
        }
    }

    /// How long `pod` may keep running next to `taint`; `None` is forever
    fn grace_for(&self, pod: &Pod, taint: &Taint) -> Option<Duration> {
        match no_execute_tolerance(&pod.tolerations, taint) {
            Tolerance::Forever => None,
            Tolerance::For(grace) => Some(grace),
            Tolerance::Untolerated => Some(match taint.key.as_str() {
                TAINT_NODE_NOT_READY => self.config.default_not_ready_toleration,
                TAINT_NODE_UNREACHABLE => self.config.default_unreachable_toleration,
                _ => Duration::ZERO,
            }),
        }
    }

    /// Bring the timers of one pod in line with its node's taints
    fn reconcile_pod(&mut self, pod_id: &PodId) {
        let Some(pod) = self.pods.get(pod_id) else {
            return;
        };
        let Some(node) = pod.bound_node.clone() else {
            return;
        };

        let wanted: Vec<(Taint, Duration)> = self
            .state
            .taints()
            .no_execute_taints(&node)
            .into_iter()
            .filter_map(|t| self.grace_for(pod, &t).map(|grace| (t, grace)))
            .collect();

        self.cancel_where(|key| {
            &key.pod == pod_id
                && (key.node != node || !wanted.iter().any(|(t, _)| t.key == key.taint_key))
        });

        let now = Instant::now();
        for (taint, grace) in wanted {
            let key = TimerKey::new(pod_id.clone(), node.clone(), taint.key.clone());
            self.arm(key, taint, grace, now);
        }
    }

    fn arm(&mut self, key: TimerKey, taint: Taint, grace: Duration, now: Instant) {
        if let Some(entry) = self.timers.get_mut(&key) {
            if !entry.state.is_terminal() {
                // keep the original start; only ever move the deadline closer
                let deadline = (entry.armed_at + grace).max(now);
                if deadline < entry.deadline {
                    if let Some(slot) = &entry.slot {
                        self.queue.reset_at(slot, deadline);
                    }
                    info!(
                        "Eviction of pod {} from node {} moved forward to {:?} from now",
                        key.pod,
                        key.node,
                        deadline - now
                    );
                    entry.deadline = deadline;
                }
                entry.taint = taint;
                return;
            }
        }

        let deadline = now + grace;
        let slot = self.queue.insert_at(key.clone(), deadline);
        info!(
            "Pod {} on node {} does not tolerate taint {}, evicting in {:?}",
            key.pod, key.node, taint, grace
        );
        self.events.emit(SchedulingEvent::eviction_armed(
            key.pod.clone(),
            key.node.clone(),
            &taint.to_string(),
            grace.as_secs(),
        ));
        self.timers.insert(
            key,
            TimerEntry {
                taint,
                state: TimerState::Armed,
                armed_at: now,
                deadline,
                slot: Some(slot),
            },
        );
    }

    /// Cancel every armed timer whose key matches
    fn cancel_where(&mut self, matches: impl Fn(&TimerKey) -> bool) {
        let keys: Vec<TimerKey> = self
            .timers
            .iter()
            .filter(|(key, entry)| !entry.state.is_terminal() && matches(*key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.cancel(&key);
        }
    }

    fn cancel(&mut self, key: &TimerKey) {
        let Some(entry) = self.timers.get_mut(key) else {
            return;
        };
        match entry.state.transition(key, TimerState::Cancelled) {
            Ok(state) => entry.state = state,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        }
        if let Some(slot) = entry.slot.take() {
            self.queue.try_remove(&slot);
        }

        info!(
            "Cancelled eviction of pod {} from node {} for taint {}",
            key.pod, key.node, entry.taint
        );
        self.events.emit(SchedulingEvent::eviction_cancelled(
            key.pod.clone(),
            key.node.clone(),
            &entry.taint.to_string(),
        ));
    }

    fn fire(&mut self, key: TimerKey) {
        let Some(entry) = self.timers.get_mut(&key) else {
            debug!("Expired timer {} is no longer tracked", key);
            return;
        };
        match entry.state.transition(&key, TimerState::Fired) {
            Ok(state) => entry.state = state,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        }
        entry.slot = None;
        let taint = entry.taint.clone();

        let Some(mut pod) = self.pods.remove(&key.pod) else {
            debug!("Timer {} fired for a pod that is gone", key);
            return;
        };
        // the pod leaves the node; its other timers go with it
        self.cancel_where(|other| other.pod == key.pod);

        pod.phase = PodPhase::Evicted;
        info!(
            "Evicting pod {} from node {} (taint {})",
            key.pod, key.node, taint
        );
        self.events.emit(SchedulingEvent::evicted(
            key.pod.clone(),
            key.node.clone(),
            &taint.to_string(),
        ));

        let terminator = self.terminator.clone();
        let evicted = self.evicted.clone();
        let node = key.node;
        tokio::spawn(async move {
            if let Err(e) = terminator.force_remove(&pod).await {
                warn!("Failed to remove evicted pod {}: {}", pod.id, e);
            }
            pod.bound_node = None;
            if evicted
                .send(EvictedPod { pod, node, taint })
                .await
                .is_err()
            {
                debug!("No receiver for evicted pods");
            }
        });
    }

    fn snapshot(&self) -> Vec<TimerInfo> {
        let mut timers: Vec<TimerInfo> = self
            .timers
            .iter()
            .map(|(key, entry)| TimerInfo {
                key: key.clone(),
                taint: entry.taint.clone(),
                state: entry.state,
                armed_at: entry.armed_at,
                deadline: entry.deadline,
            })
            .collect();
        timers.sort_by(|a, b| a.key.cmp(&b.key));
        timers
    }
}
