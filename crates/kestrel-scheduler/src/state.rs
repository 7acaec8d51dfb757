use crate::config::BackoffConfig;
use crate::ledger::ResourceLedger;
use crate::queue::SchedulingQueue;
use crate::taint_index::{TaintDelta, TaintIndex};
use crate::types::NodeInfo;
use kestrel_core::{
    ClusterSnapshot, DisruptionBudget, Node, NodeId, Pod, PodId, PodPhase, Taint, TaintEffect,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Change in where a pod runs, published to binding subscribers
#[derive(Debug, Clone)]
pub enum BindingEvent {
    /// The pod now runs on `node`
    Bound { pod: Pod, node: NodeId },
    /// The pod no longer runs on `node`
    Unbound { pod: PodId, node: NodeId },
}

/// The engine's view of the cluster.
///
/// Seeded from a [`ClusterSnapshot`]; afterwards only binds, evictions and
/// taint updates change it. Locks are never held across an await point.
///
/// Every taint update publishes the node on the taint channel when its
/// NoExecute taints changed, whoever made the update.
pub struct ClusterState {
    nodes: RwLock<BTreeMap<NodeId, Node>>,
    pods: RwLock<BTreeMap<PodId, Pod>>,
    budgets: RwLock<Vec<DisruptionBudget>>,
    taints: TaintIndex,
    ledger: ResourceLedger,
    queue: SchedulingQueue,
    bindings: broadcast::Sender<BindingEvent>,
    no_execute_changes: broadcast::Sender<NodeId>,
}

impl ClusterState {
    pub fn new(backoff: BackoffConfig, binding_capacity: usize) -> Self {
        let (bindings, _) = broadcast::channel(binding_capacity.max(1));
        let (no_execute_changes, _) = broadcast::channel(binding_capacity.max(1));
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            pods: RwLock::new(BTreeMap::new()),
            budgets: RwLock::new(Vec::new()),
            taints: TaintIndex::new(),
            ledger: ResourceLedger::new(),
            queue: SchedulingQueue::new(backoff),
            bindings,
            no_execute_changes,
        }
    }

    /// Replace the whole view with `snapshot` and queue its pending pods.
    /// Bound pods are announced to binding subscribers.
    pub fn load(&self, snapshot: ClusterSnapshot) {
        info!(
            "Loading snapshot with {} nodes, {} pods, {} disruption budgets",
            snapshot.nodes.len(),
            snapshot.pods.len(),
            snapshot.budgets.len()
        );

        self.ledger.clear();
        for stale in self.taints.nodes() {
            if !snapshot.nodes.iter().any(|n| n.id == stale) {
                let delta = self.taints.remove_node(&stale);
                self.publish_taints(&stale, &delta);
            }
        }
        for node in &snapshot.nodes {
            self.ledger.upsert_node(&node.id, node.allocatable.clone());
            let delta = self.taints.set_taints(&node.id, node.taints.clone());
            self.publish_taints(&node.id, &delta);
        }
        for pod in &snapshot.pods {
            if let Some(node) = &pod.bound_node {
                if self.ledger.force_reserve(node, pod).is_err() {
                    debug!("Pod {} is bound to unknown node {}", pod.id, node);
                }
            }
        }

        *self.nodes.write() = snapshot
            .nodes
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        *self.budgets.write() = snapshot.budgets;

        let pods: BTreeMap<PodId, Pod> = snapshot
            .pods
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        for pod in pods.values().filter(|p| !p.is_bound()) {
            self.queue.push(pod);
        }
        let bound: Vec<Pod> = pods.values().filter(|p| p.is_bound()).cloned().collect();
        *self.pods.write() = pods;

        for pod in bound {
            if let Some(node) = pod.bound_node.clone() {
                let _ = self.bindings.send(BindingEvent::Bound { pod, node });
            }
        }
    }

    pub fn queue(&self) -> &SchedulingQueue {
        &self.queue
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn taints(&self) -> &TaintIndex {
        &self.taints
    }

    pub fn subscribe_bindings(&self) -> broadcast::Receiver<BindingEvent> {
        self.bindings.subscribe()
    }

    /// Subscribe to nodes whose NoExecute taints changed
    pub fn subscribe_no_execute(&self) -> broadcast::Receiver<NodeId> {
        self.no_execute_changes.subscribe()
    }

    fn publish_taints(&self, node: &NodeId, delta: &TaintDelta) {
        let added = delta.added_no_execute().count();
        let removed = delta.removed_no_execute().count();
        if added + removed == 0 {
            return;
        }
        debug!(
            "Node {} NoExecute taints changed: {} added, {} removed",
            node, added, removed
        );
        let _ = self.no_execute_changes.send(node.clone());
    }

    pub fn pod(&self, id: &PodId) -> Option<Pod> {
        self.pods.read().get(id).cloned()
    }

    pub fn budgets(&self) -> Vec<DisruptionBudget> {
        self.budgets.read().clone()
    }

    /// Pods currently bound to a node
    pub fn bound_pods(&self) -> Vec<Pod> {
        self.pods
            .read()
            .values()
            .filter(|p| p.is_bound())
            .cloned()
            .collect()
    }

    /// Per-node view used by the filter and score pipelines. Taints come
    /// from the taint index, placed resources from the ledger.
    pub fn node_infos(&self) -> Vec<NodeInfo> {
        let nodes = self.nodes.read();
        let pods = self.pods.read();

        nodes
            .values()
            .map(|node| {
                let mut node = node.clone();
                node.taints = self.taints.taints_of(&node.id);
                let requested = self.ledger.requested(&node.id).unwrap_or_default();
                let placed = pods
                    .values()
                    .filter(|p| p.bound_node.as_ref() == Some(&node.id))
                    .cloned()
                    .collect();
                NodeInfo {
                    node,
                    requested,
                    pods: placed,
                }
            })
            .collect()
    }

    /// Replace the taints of `node`
    pub fn set_node_taints(&self, node: &NodeId, taints: Vec<Taint>) -> TaintDelta {
        let delta = self.taints.set_taints(node, taints);
        self.taints_changed(node, &delta);
        delta
    }

    /// Add one taint to `node`, replacing any with the same key and effect
    pub fn add_node_taint(&self, node: &NodeId, taint: Taint) -> TaintDelta {
        let delta = self.taints.add_taint(node, taint);
        self.taints_changed(node, &delta);
        delta
    }

    /// Remove the taint with `key` and `effect` from `node`
    pub fn remove_node_taint(&self, node: &NodeId, key: &str, effect: TaintEffect) -> TaintDelta {
        let delta = self.taints.remove_taint(node, key, effect);
        self.taints_changed(node, &delta);
        delta
    }

    fn taints_changed(&self, node: &NodeId, delta: &TaintDelta) {
        if let Some(n) = self.nodes.write().get_mut(node) {
            n.taints = self.taints.taints_of(node);
        }
        self.publish_taints(node, delta);
    }

    /// Record that `pod` now runs on `node`. The ledger reservation must
    /// already be in place.
    pub fn record_binding(&self, pod_id: &PodId, node: &NodeId) -> Option<Pod> {
        let bound = {
            let mut pods = self.pods.write();
            let pod = pods.get_mut(pod_id)?;
            pod.bound_node = Some(node.clone());
            pod.phase = PodPhase::Running;
            pod.clone()
        };
        self.queue.forget(pod_id);
        let _ = self.bindings.send(BindingEvent::Bound {
            pod: bound.clone(),
            node: node.clone(),
        });
        Some(bound)
    }

    /// Detach a pod from its node and queue it again as pending
    pub fn requeue_evicted(&self, pod_id: &PodId) -> Option<Pod> {
        let (pod, node) = {
            let mut pods = self.pods.write();
            let pod = pods.get_mut(pod_id)?;
            let node = pod.bound_node.take();
            pod.phase = PodPhase::Pending;
            (pod.clone(), node)
        };

        if let Some(node) = node {
            self.ledger.release(&node, pod_id);
            let _ = self.bindings.send(BindingEvent::Unbound {
                pod: pod_id.clone(),
                node,
            });
        }
        self.queue.push(&pod);
        info!("Pod {} re-entered the scheduling queue", pod_id);
        Some(pod)
    }

    /// Delete a pod entirely
    pub fn remove_pod(&self, pod_id: &PodId) -> Option<Pod> {
        let pod = self.pods.write().remove(pod_id)?;
        self.queue.forget(pod_id);
        if let Some(node) = &pod.bound_node {
            self.ledger.release(node, pod_id);
            let _ = self.bindings.send(BindingEvent::Unbound {
                pod: pod_id.clone(),
                node: node.clone(),
            });
        }
        Some(pod)
    }
}

/// Shared handle to the cluster view
pub type SharedState = Arc<ClusterState>;

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::ResourceQuantities;

    fn snapshot() -> ClusterSnapshot {
        ClusterSnapshot::new(
            vec![Node::new("node1", ResourceQuantities::new(4000, 8 << 30))
                .with_taint(Taint::new("key1", None, TaintEffect::NoSchedule))],
            vec![
                Pod::new("default/running", ResourceQuantities::new(1000, 1 << 30))
                    .bound_to("node1"),
                Pod::new("default/pending", ResourceQuantities::new(500, 1 << 30)),
            ],
        )
    }

    #[test]
    fn test_load_seeds_everything() {
        let state = ClusterState::new(BackoffConfig::default(), 16);
        state.load(snapshot());

        let node = NodeId::from("node1");
        assert_eq!(state.ledger().requested(&node).unwrap().cpu_millicores, 1000);
        assert_eq!(state.taints().taints_of(&node).len(), 1);
        assert!(state.queue().contains(&PodId::from("default/pending")));
        assert!(!state.queue().contains(&PodId::from("default/running")));

        let infos = state.node_infos();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].pods.len(), 1);
        assert_eq!(infos[0].available().cpu_millicores, 3000);
    }

    #[tokio::test]
    async fn test_requeue_evicted_releases_and_publishes() {
        let state = ClusterState::new(BackoffConfig::default(), 16);
        state.load(snapshot());
        let mut rx = state.subscribe_bindings();

        let pod_id = PodId::from("default/running");
        let pod = state.requeue_evicted(&pod_id).unwrap();
        assert_eq!(pod.phase, PodPhase::Pending);
        assert!(pod.bound_node.is_none());
        assert!(state.queue().contains(&pod_id));
        assert_eq!(state.ledger().requested(&NodeId::from("node1")).unwrap().cpu_millicores, 0);

        match rx.recv().await.unwrap() {
            BindingEvent::Unbound { pod, node } => {
                assert_eq!(pod, pod_id);
                assert_eq!(node, NodeId::from("node1"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_set_node_taints_updates_view() {
        let state = ClusterState::new(BackoffConfig::default(), 16);
        state.load(snapshot());
        let node = NodeId::from("node1");

        let delta = state.set_node_taints(&node, Vec::new());
        assert_eq!(delta.removed.len(), 1);
        assert!(state.node_infos()[0].node.taints.is_empty());
    }

    #[tokio::test]
    async fn test_no_execute_changes_are_published() {
        let state = ClusterState::new(BackoffConfig::default(), 16);
        state.load(snapshot());
        let mut rx = state.subscribe_no_execute();
        let node = NodeId::from("node1");

        // NoSchedule only: nothing to publish
        state.set_node_taints(&node, Vec::new());
        state.set_node_taints(
            &node,
            vec![Taint::new("maintenance", None, TaintEffect::NoExecute)],
        );
        assert_eq!(rx.recv().await.unwrap(), node);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_single_taint_edits_are_published() {
        let state = ClusterState::new(BackoffConfig::default(), 16);
        state.load(snapshot());
        let mut rx = state.subscribe_no_execute();
        let node = NodeId::from("node1");

        let delta = state.add_node_taint(&node, Taint::new("drain", None, TaintEffect::NoExecute));
        assert_eq!(delta.added.len(), 1);
        assert_eq!(state.node_infos()[0].node.taints.len(), 2);
        assert_eq!(rx.recv().await.unwrap(), node);

        let delta = state.remove_node_taint(&node, "drain", TaintEffect::NoExecute);
        assert_eq!(delta.removed.len(), 1);
        assert_eq!(rx.recv().await.unwrap(), node);

        // NoSchedule edits stay silent
        state.remove_node_taint(&node, "key1", TaintEffect::NoSchedule);
        assert!(rx.try_recv().is_err());
        assert!(state.taints().taints_of(&node).is_empty());
    }

    #[test]
    fn test_reload_forgets_stale_nodes() {
        let state = ClusterState::new(BackoffConfig::default(), 16);
        state.load(snapshot());
        state.load(ClusterSnapshot::new(
            vec![Node::new("node2", ResourceQuantities::new(1000, 1 << 30))],
            Vec::new(),
        ));
        assert_eq!(state.taints().nodes(), vec![NodeId::from("node2")]);
    }
}
