//! Conversion from `k8s-openapi` core/v1 objects into engine types.
//!
//! Conversion validates as it goes: a pod or node that converts
//! successfully satisfies the same rules the admission boundary enforces.

use crate::affinity::{
    NodeAffinity, NodeSelectorOperator, NodeSelectorRequirement, NodeSelectorTerm,
    PreferredSchedulingTerm,
};
use crate::resources::ResourceQuantities;
use crate::taint::{Taint, TaintEffect, Toleration, TolerationOperator};
use crate::types::{
    ConditionStatus, ContainerImage, Node, NodeCondition, NodeId, Pod, PodId, PodPhase,
    PreemptionPolicy,
};
use crate::{KestrelError, Result};
use k8s_openapi::api::core::v1 as k8s;
use std::collections::BTreeMap;

impl TryFrom<&k8s::Toleration> for Toleration {
    type Error = KestrelError;

    fn try_from(t: &k8s::Toleration) -> Result<Self> {
        let toleration = Toleration {
            key: t.key.clone().filter(|k| !k.is_empty()),
            operator: t.operator.as_deref().unwrap_or("").parse::<TolerationOperator>()?,
            value: t.value.clone(),
            effect: match t.effect.as_deref() {
                None | Some("") => None,
                Some(effect) => Some(effect.parse::<TaintEffect>()?),
            },
            toleration_seconds: t.toleration_seconds,
        };
        toleration.validate()?;
        Ok(toleration)
    }
}

impl TryFrom<&k8s::Taint> for Taint {
    type Error = KestrelError;

    fn try_from(t: &k8s::Taint) -> Result<Self> {
        let taint = Taint {
            key: t.key.clone(),
            value: t.value.clone(),
            effect: t.effect.parse::<TaintEffect>()?,
            time_added: t.time_added.as_ref().map(|time| time.0),
        };
        taint.validate()?;
        Ok(taint)
    }
}

impl TryFrom<&k8s::NodeSelectorRequirement> for NodeSelectorRequirement {
    type Error = KestrelError;

    fn try_from(r: &k8s::NodeSelectorRequirement) -> Result<Self> {
        Ok(NodeSelectorRequirement {
            key: r.key.clone(),
            operator: r.operator.parse::<NodeSelectorOperator>()?,
            values: r.values.clone().unwrap_or_default(),
        })
    }
}

impl TryFrom<&k8s::NodeSelectorTerm> for NodeSelectorTerm {
    type Error = KestrelError;

    fn try_from(term: &k8s::NodeSelectorTerm) -> Result<Self> {
        let convert = |reqs: &Option<Vec<k8s::NodeSelectorRequirement>>| -> Result<Vec<_>> {
            reqs.as_deref()
                .unwrap_or_default()
                .iter()
                .map(NodeSelectorRequirement::try_from)
                .collect()
        };

        Ok(NodeSelectorTerm {
            match_expressions: convert(&term.match_expressions)?,
            match_fields: convert(&term.match_fields)?,
        })
    }
}

impl TryFrom<&k8s::NodeAffinity> for NodeAffinity {
    type Error = KestrelError;

    fn try_from(affinity: &k8s::NodeAffinity) -> Result<Self> {
        let required = match &affinity.required_during_scheduling_ignored_during_execution {
            Some(selector) => Some(
                selector
                    .node_selector_terms
                    .iter()
                    .map(NodeSelectorTerm::try_from)
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };

        let preferred = affinity
            .preferred_during_scheduling_ignored_during_execution
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|term| {
                Ok(PreferredSchedulingTerm {
                    weight: term.weight,
                    preference: NodeSelectorTerm::try_from(&term.preference)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let out = NodeAffinity {
            required,
            preferred,
        };
        out.validate()?;
        Ok(out)
    }
}

/// Convert a k8s Pod.
///
/// `spec.nodeName` is read as the explicit pin while the pod is pending and
/// as the binding once `status.phase` is Running.
pub fn pod_from_k8s(pod: &k8s::Pod) -> Result<Pod> {
    let name = pod
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| {
            KestrelError::validation_failed("Pod", "metadata.name is missing", "Set metadata.name")
        })?;
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");

    let spec = pod
        .spec
        .as_ref()
        .ok_or_else(|| {
            KestrelError::validation_failed("Pod", "spec is missing", "Add a pod spec")
        })?;

    let mut requests = ResourceQuantities::default();
    let mut images = Vec::new();
    for container in &spec.containers {
        if let Some(reqs) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
            requests = requests.add(&ResourceQuantities::from_k8s_resource_map(reqs)?);
        }
        if let Some(image) = &container.image {
            images.push(image.clone());
        }
    }

    let tolerations = spec
        .tolerations
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(Toleration::try_from)
        .collect::<Result<Vec<_>>>()?;

    let affinity = match spec.affinity.as_ref().and_then(|a| a.node_affinity.as_ref()) {
        Some(node_affinity) => Some(NodeAffinity::try_from(node_affinity)?),
        None => None,
    };

    let preemption_policy = match spec.preemption_policy.as_deref() {
        None | Some("") | Some("PreemptLowerPriority") => PreemptionPolicy::PreemptLowerPriority,
        Some("Never") => PreemptionPolicy::Never,
        Some(other) => {
            return Err(KestrelError::validation_failed(
                "Pod",
                format!("unknown preemptionPolicy '{}'", other),
                "Use PreemptLowerPriority or Never",
            ))
        }
    };

    let running = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some("Running");
    let node = spec.node_name.as_deref().map(NodeId::from);

    let out = Pod {
        id: PodId::namespaced(namespace, name),
        priority: spec.priority.unwrap_or(0),
        preemption_policy,
        tolerations,
        requests,
        node_name: if running { None } else { node.clone() },
        bound_node: if running { node } else { None },
        node_selector: spec.node_selector.clone().unwrap_or_default(),
        affinity,
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        images,
        phase: if running { PodPhase::Running } else { PodPhase::Pending },
    };
    out.validate()?;
    Ok(out)
}

/// Convert a k8s Node
pub fn node_from_k8s(node: &k8s::Node) -> Result<Node> {
    let name = node
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| {
            KestrelError::validation_failed("Node", "metadata.name is missing", "Set metadata.name")
        })?;

    let taints = node
        .spec
        .as_ref()
        .and_then(|s| s.taints.as_deref())
        .unwrap_or_default()
        .iter()
        .map(Taint::try_from)
        .collect::<Result<Vec<_>>>()?;

    let unschedulable = node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);

    let status = node.status.as_ref();

    let allocatable = match status.and_then(|s| s.allocatable.as_ref()) {
        Some(map) => ResourceQuantities::from_k8s_resource_map(map)?,
        None => ResourceQuantities::default(),
    };

    let conditions = status
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default()
        .iter()
        .map(|c| NodeCondition {
            condition_type: c.type_.clone(),
            status: match c.status.as_str() {
                "True" => ConditionStatus::True,
                "False" => ConditionStatus::False,
                _ => ConditionStatus::Unknown,
            },
        })
        .collect();

    let images = status
        .and_then(|s| s.images.as_deref())
        .unwrap_or_default()
        .iter()
        .map(|image| ContainerImage {
            names: image.names.clone().unwrap_or_default(),
            size_bytes: image.size_bytes.unwrap_or(0),
        })
        .collect();

    let out = Node {
        id: NodeId::new(name),
        labels: node.metadata.labels.clone().unwrap_or_else(BTreeMap::new),
        taints,
        allocatable,
        conditions,
        unschedulable,
        images,
    };
    out.validate()?;
    Ok(out)
}
