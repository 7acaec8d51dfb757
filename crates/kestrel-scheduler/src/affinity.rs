//! Node affinity evaluation
//!
//! Required terms are OR'ed; the expressions inside a term are AND'ed.
//! A pod's `nodeSelector` must also match exactly. Preferred terms only
//! contribute score.

use kestrel_core::affinity::FIELD_METADATA_NAME;
use kestrel_core::{
    parse_strict_i64, Node, NodeSelectorOperator, NodeSelectorRequirement, NodeSelectorTerm, Pod,
};
use std::collections::BTreeMap;

/// Evaluate one expression against a label set
pub fn matches_requirement(
    requirement: &NodeSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> bool {
    let value = labels.get(&requirement.key);
    let values = &requirement.values;

    match requirement.operator {
        NodeSelectorOperator::In => value.is_some_and(|v| values.contains(v)),
        NodeSelectorOperator::NotIn => value.is_none_or(|v| !values.contains(v)),
        NodeSelectorOperator::Exists => value.is_some(),
        NodeSelectorOperator::DoesNotExist => value.is_none(),
        NodeSelectorOperator::Gt | NodeSelectorOperator::Lt => {
            let (Some(label), Some(wanted)) = (value, values.first()) else {
                return false;
            };
            match (parse_strict_i64(label), parse_strict_i64(wanted)) {
                (Ok(label), Ok(wanted)) => match requirement.operator {
                    NodeSelectorOperator::Gt => label > wanted,
                    _ => label < wanted,
                },
                _ => false,
            }
        }
    }
}

fn matches_field(requirement: &NodeSelectorRequirement, node: &Node) -> bool {
    if requirement.key != FIELD_METADATA_NAME {
        return false;
    }
    let mut fields = BTreeMap::new();
    fields.insert(FIELD_METADATA_NAME.to_string(), node.id.to_string());
    matches_requirement(requirement, &fields)
}

/// Whether every expression and field of `term` matches. An empty term
/// matches no node.
pub fn matches_term(term: &NodeSelectorTerm, node: &Node) -> bool {
    if term.is_empty() {
        return false;
    }
    term.match_expressions
        .iter()
        .all(|r| matches_requirement(r, &node.labels))
        && term.match_fields.iter().all(|r| matches_field(r, node))
}

/// Whether the node carries every label of the pod's nodeSelector
pub fn matches_node_selector(pod: &Pod, node: &Node) -> bool {
    pod.node_selector
        .iter()
        .all(|(k, v)| node.labels.get(k) == Some(v))
}

/// Required placement constraints: nodeSelector and required terms
pub fn required_matches(pod: &Pod, node: &Node) -> bool {
    if !matches_node_selector(pod, node) {
        return false;
    }
    match pod.affinity.as_ref().and_then(|a| a.required.as_ref()) {
        None => true,
        Some(terms) => terms.iter().any(|term| matches_term(term, node)),
    }
}

/// Sum of the weights of the preferred terms the node matches
pub fn preferred_weight(pod: &Pod, node: &Node) -> i64 {
    pod.affinity
        .as_ref()
        .map(|affinity| {
            affinity
                .preferred
                .iter()
                .filter(|term| matches_term(&term.preference, node))
                .map(|term| i64::from(term.weight))
                .sum()
        })
        .unwrap_or(0)
}
