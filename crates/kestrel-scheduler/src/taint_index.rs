use kestrel_core::{NodeId, Taint, TaintEffect};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Taints added to and removed from a node by one update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaintDelta {
    pub added: Vec<Taint>,
    pub removed: Vec<Taint>,
}

impl TaintDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    /// Added taints with the NoExecute effect
    pub fn added_no_execute(&self) -> impl Iterator<Item = &Taint> {
        self.added
            .iter()
            .filter(|t| t.effect == TaintEffect::NoExecute)
    }

    /// Removed taints with the NoExecute effect
    pub fn removed_no_execute(&self) -> impl Iterator<Item = &Taint> {
        self.removed
            .iter()
            .filter(|t| t.effect == TaintEffect::NoExecute)
    }
}

/// Per-node set of taints.
///
/// Two taints are the same when key, value and effect agree; `time_added`
/// is informational and ignored.
#[derive(Debug, Default)]
pub struct TaintIndex {
    nodes: RwLock<HashMap<NodeId, Vec<Taint>>>,
}

fn same(a: &Taint, b: &Taint) -> bool {
    a.key == b.key && a.value_str() == b.value_str() && a.effect == b.effect
}

impl TaintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the taint set of `node`
    pub fn set_taints(&self, node: &NodeId, taints: Vec<Taint>) -> TaintDelta {
        self.update(node, |_| taints)
    }

    /// Add one taint, replacing any taint with the same key and effect
    pub fn add_taint(&self, node: &NodeId, taint: Taint) -> TaintDelta {
        self.update(node, |current| {
            let mut taints: Vec<Taint> = current
                .iter()
                .filter(|t| t.identity() != taint.identity())
                .cloned()
                .collect();
            taints.push(taint);
            taints
        })
    }

    /// Remove the taint with `key` and `effect`
    pub fn remove_taint(&self, node: &NodeId, key: &str, effect: TaintEffect) -> TaintDelta {
        self.update(node, |current| {
            current
                .iter()
                .filter(|t| t.identity() != (key, effect))
                .cloned()
                .collect()
        })
    }

    /// Compute and store the next taint set under one write guard
    fn update(&self, node: &NodeId, next: impl FnOnce(&[Taint]) -> Vec<Taint>) -> TaintDelta {
        let mut nodes = self.nodes.write();
        let current = nodes.entry(node.clone()).or_default();
        let taints = next(current.as_slice());

        let removed = current
            .iter()
            .filter(|old| !taints.iter().any(|new| same(old, new)))
            .cloned()
            .collect();
        let added = taints
            .iter()
            .filter(|new| !current.iter().any(|old| same(old, new)))
            .cloned()
            .collect();

        *current = taints;
        TaintDelta { added, removed }
    }

    /// Forget `node`; all of its taints count as removed
    pub fn remove_node(&self, node: &NodeId) -> TaintDelta {
        let removed = self.nodes.write().remove(node).unwrap_or_default();
        TaintDelta {
            added: Vec::new(),
            removed,
        }
    }

    pub fn taints_of(&self, node: &NodeId) -> Vec<Taint> {
        self.nodes.read().get(node).cloned().unwrap_or_default()
    }

    /// NoExecute taints currently on `node`
    pub fn no_execute_taints(&self, node: &NodeId) -> Vec<Taint> {
        self.nodes
            .read()
            .get(node)
            .map(|taints| {
                taints
                    .iter()
                    .filter(|t| t.effect == TaintEffect::NoExecute)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
