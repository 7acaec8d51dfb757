//! Mapping node conditions to taints
//!
//! A node whose Ready condition is False carries the not-ready NoExecute
//! taint, one whose Ready condition is Unknown (or missing) carries the
//! unreachable NoExecute taint, and a cordoned node carries the
//! unschedulable NoSchedule taint.

use kestrel_core::{
    ConditionStatus, Node, Taint, TaintEffect, TAINT_NODE_NOT_READY, TAINT_NODE_UNREACHABLE,
    TAINT_NODE_UNSCHEDULABLE,
};
use tracing::debug;

const CONDITION_TAINT_KEYS: [&str; 3] = [
    TAINT_NODE_NOT_READY,
    TAINT_NODE_UNREACHABLE,
    TAINT_NODE_UNSCHEDULABLE,
];

/// Whether `key` is managed from node conditions
pub fn is_condition_taint(key: &str) -> bool {
    CONDITION_TAINT_KEYS.contains(&key)
}

/// Taints implied by the node's conditions and cordon flag
pub fn condition_taints(node: &Node) -> Vec<Taint> {
    let mut taints = Vec::new();

    match node.ready_status() {
        Some(ConditionStatus::True) => {}
        Some(ConditionStatus::False) => {
            taints.push(Taint::new(TAINT_NODE_NOT_READY, None, TaintEffect::NoExecute));
        }
        Some(ConditionStatus::Unknown) | None => {
            debug!("Node {} has no known Ready status", node.id);
            taints.push(Taint::new(TAINT_NODE_UNREACHABLE, None, TaintEffect::NoExecute));
        }
    }

    if node.unschedulable {
        taints.push(Taint::new(TAINT_NODE_UNSCHEDULABLE, None, TaintEffect::NoSchedule));
    }

    taints
}

/// The node's own taints with the condition taints brought up to date.
///
/// Taints not managed from conditions are kept as they are. A condition
/// taint that is still implied keeps its original entry, so its
/// `time_added` survives.
pub fn effective_taints(node: &Node) -> Vec<Taint> {
    let implied = condition_taints(node);

    let mut taints: Vec<Taint> = node
        .taints
        .iter()
        .filter(|t| {
            !is_condition_taint(&t.key) || implied.iter().any(|i| i.identity() == t.identity())
        })
        .cloned()
        .collect();

    for taint in implied {
        if !taints.iter().any(|t| t.identity() == taint.identity()) {
            taints.push(taint);
        }
    }

    taints
}
