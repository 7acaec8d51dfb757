use crate::{Result, SchedulerError};
use kestrel_core::{KestrelError, NodeId, Pod, PodId, ResourceQuantities};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct NodeLedger {
    allocatable: ResourceQuantities,
    reservations: BTreeMap<PodId, ResourceQuantities>,
}

impl NodeLedger {
    fn requested(&self) -> ResourceQuantities {
        self.reservations
            .values()
            .fold(ResourceQuantities::default(), |acc, r| acc.add(r))
    }
}

/// Per-node record of resources reserved by placed pods.
///
/// Each node has its own lock, so binds on different nodes never contend.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    nodes: RwLock<HashMap<NodeId, Arc<Mutex<NodeLedger>>>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, node: &NodeId) -> Option<Arc<Mutex<NodeLedger>>> {
        self.nodes.read().get(node).cloned()
    }

    /// Register a node, or update its allocatable capacity
    pub fn upsert_node(&self, node: &NodeId, allocatable: ResourceQuantities) {
        if let Some(entry) = self.entry(node) {
            entry.lock().allocatable = allocatable;
            return;
        }
        self.nodes
            .write()
            .entry(node.clone())
            .or_default()
            .lock()
            .allocatable = allocatable;
    }

    /// Reserve the pod's requests if they still fit.
    ///
    /// The fit check and the reservation happen under the node's lock.
    pub fn try_reserve(&self, node: &NodeId, pod: &Pod) -> Result<()> {
        let entry = self
            .entry(node)
            .ok_or_else(|| KestrelError::node_not_found(node.as_str()))?;
        let mut ledger = entry.lock();

        if ledger.reservations.contains_key(&pod.id) {
            return Ok(());
        }

        let available = ledger.allocatable.sub(&ledger.requested());
        let missing = pod.requests.insufficient(&available);
        if !missing.is_empty() {
            return Err(SchedulerError::bind_conflict(
                pod.id.as_str(),
                node.as_str(),
                format!("insufficient {}", missing.join(", ")),
            ));
        }

        ledger.reservations.insert(pod.id.clone(), pod.requests.clone());
        debug!("Reserved {} on node {} for pod {}", pod.requests, node, pod.id);
        Ok(())
    }

    /// Reserve without checking fit (explicitly pinned pods)
    pub fn force_reserve(&self, node: &NodeId, pod: &Pod) -> Result<()> {
        let entry = self
            .entry(node)
            .ok_or_else(|| KestrelError::node_not_found(node.as_str()))?;
        entry
            .lock()
            .reservations
            .insert(pod.id.clone(), pod.requests.clone());
        Ok(())
    }

    /// Drop the pod's reservation, returning what it held
    pub fn release(&self, node: &NodeId, pod: &PodId) -> Option<ResourceQuantities> {
        let released = self.entry(node)?.lock().reservations.remove(pod);
        if let Some(resources) = &released {
            debug!("Released {} on node {} from pod {}", resources, node, pod);
        }
        released
    }

    pub fn requested(&self, node: &NodeId) -> Option<ResourceQuantities> {
        self.entry(node).map(|entry| entry.lock().requested())
    }

    pub fn available(&self, node: &NodeId) -> Option<ResourceQuantities> {
        self.entry(node).map(|entry| {
            let ledger = entry.lock();
            ledger.allocatable.sub(&ledger.requested())
        })
    }

    pub fn clear(&self) {
        self.nodes.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_node(cpu: i64) -> (ResourceLedger, NodeId) {
        let ledger = ResourceLedger::new();
        let node = NodeId::from("node1");
        ledger.upsert_node(&node, ResourceQuantities::new(cpu, 8 << 30));
        (ledger, node)
    }

    #[test]
    fn test_reserve_and_release() {
        let (ledger, node) = ledger_with_node(4000);
        let pod = Pod::new("default/a", ResourceQuantities::new(1500, 1 << 30));

        ledger.try_reserve(&node, &pod).unwrap();
        assert_eq!(ledger.available(&node).unwrap().cpu_millicores, 2500);

        // reserving twice is idempotent
        ledger.try_reserve(&node, &pod).unwrap();
        assert_eq!(ledger.requested(&node).unwrap().cpu_millicores, 1500);

        assert!(ledger.release(&node, &pod.id).is_some());
        assert_eq!(ledger.available(&node).unwrap().cpu_millicores, 4000);
    }

    #[test]
    fn test_second_reservation_conflicts() {
        let (ledger, node) = ledger_with_node(2000);
        let a = Pod::new("default/a", ResourceQuantities::new(1500, 1 << 20));
        let b = Pod::new("default/b", ResourceQuantities::new(1000, 1 << 20));

        ledger.try_reserve(&node, &a).unwrap();
        let err = ledger.try_reserve(&node, &b).unwrap_err();
        assert!(matches!(err, SchedulerError::BindConflict { .. }));
    }

    #[test]
    fn test_force_reserve_overcommits() {
        let (ledger, node) = ledger_with_node(1000);
        let pod = Pod::new("default/pinned", ResourceQuantities::new(3000, 1 << 20));

        ledger.force_reserve(&node, &pod).unwrap();
        assert_eq!(ledger.available(&node).unwrap().cpu_millicores, -2000);
    }

    #[test]
    fn test_unknown_node() {
        let ledger = ResourceLedger::new();
        let pod = Pod::new("default/a", ResourceQuantities::new(1, 1));
        let err = ledger.try_reserve(&NodeId::from("ghost"), &pod).unwrap_err();
        assert!(matches!(err, SchedulerError::CoreError(KestrelError::NodeNotFound { .. })));
    }

    #[test]
    fn test_concurrent_reservations_never_overcommit() {
        let (ledger, node) = ledger_with_node(1000);
        let ledger = Arc::new(ledger);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                let node = node.clone();
                std::thread::spawn(move || {
                    let pod = Pod::new(format!("default/p{}", i), ResourceQuantities::new(300, 0));
                    ledger.try_reserve(&node, &pod).is_ok()
                })
            })
            .collect();

        let bound = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(bound, 3);
        assert_eq!(ledger.available(&node).unwrap().cpu_millicores, 100);
    }
}
