use crate::affinity::NodeAffinity;
use crate::resources::ResourceQuantities;
use crate::taint::{validate_taints, validate_tolerations, Taint, Toleration};
use crate::taint::{TAINT_NODE_NOT_READY, TAINT_NODE_UNREACHABLE};
use crate::{KestrelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Node identifier (the node name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Pod identifier in `namespace/name` form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodId(pub String);

impl PodId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build an id from namespace and name
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self(format!("{}/{}", namespace, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PodId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status of a node condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Observed node condition (Ready, MemoryPressure, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
}

impl NodeCondition {
    pub fn ready(status: ConditionStatus) -> Self {
        Self {
            condition_type: "Ready".to_string(),
            status,
        }
    }
}

/// Container image cached on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerImage {
    pub names: Vec<String>,
    #[serde(default)]
    pub size_bytes: i64,
}

/// A host able to run pods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub allocatable: ResourceQuantities,
    #[serde(default)]
    pub conditions: Vec<NodeCondition>,
    /// Cordoned
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default)]
    pub images: Vec<ContainerImage>,
}

impl Node {
    pub fn new(id: impl Into<String>, allocatable: ResourceQuantities) -> Self {
        Self {
            id: NodeId::new(id),
            labels: BTreeMap::new(),
            taints: Vec::new(),
            allocatable,
            conditions: vec![NodeCondition::ready(ConditionStatus::True)],
            unschedulable: false,
            images: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_taint(mut self, taint: Taint) -> Self {
        self.taints.push(taint);
        self
    }

    /// Status of the Ready condition, if reported
    pub fn ready_status(&self) -> Option<ConditionStatus> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == "Ready")
            .map(|c| c.status)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(KestrelError::validation_failed(
                "Node",
                "node id is empty",
                "Every node needs a name",
            ));
        }
        validate_non_negative(&self.allocatable)?;
        validate_taints(&self.taints)
    }
}

/// Whether a pod may preempt lower-priority pods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PreemptionPolicy {
    #[default]
    PreemptLowerPriority,
    Never,
}

/// Lifecycle phase of a pod as tracked by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Evicted,
}

/// A workload unit to be placed on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub id: PodId,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub preemption_policy: PreemptionPolicy,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub requests: ResourceQuantities,
    /// Explicit pin: bypasses filtering entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<NodeId>,
    /// Node the pod is bound to, once scheduled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_node: Option<NodeId>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<NodeAffinity>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub phase: PodPhase,
}

impl Pod {
    pub fn new(id: impl Into<String>, requests: ResourceQuantities) -> Self {
        Self {
            id: PodId::new(id),
            priority: 0,
            preemption_policy: PreemptionPolicy::default(),
            tolerations: Vec::new(),
            requests,
            node_name: None,
            bound_node: None,
            node_selector: BTreeMap::new(),
            affinity: None,
            labels: BTreeMap::new(),
            images: Vec::new(),
            phase: PodPhase::Pending,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_toleration(mut self, toleration: Toleration) -> Self {
        self.tolerations.push(toleration);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn pinned_to(mut self, node: impl Into<String>) -> Self {
        self.node_name = Some(NodeId::new(node));
        self
    }

    /// Mark the pod as running on `node`
    pub fn bound_to(mut self, node: impl Into<String>) -> Self {
        self.bound_node = Some(NodeId::new(node));
        self.phase = PodPhase::Running;
        self
    }

    pub fn is_bound(&self) -> bool {
        self.bound_node.is_some()
    }

    /// Whether the pod may preempt others
    pub fn can_preempt(&self) -> bool {
        self.preemption_policy != PreemptionPolicy::Never
    }

    /// Whether the pod declares any toleration for `key` with the NoExecute
    /// effect (explicitly or via wildcard effect)
    pub fn has_no_execute_toleration_for(&self, key: &str) -> bool {
        self.tolerations.iter().any(|t| {
            (t.key_str().is_empty() || t.key_str() == key)
                && matches!(t.effect, None | Some(crate::TaintEffect::NoExecute))
        })
    }

    /// Whether the pod already carries tolerations for both node-condition
    /// taints
    pub fn tolerates_node_conditions(&self) -> bool {
        self.has_no_execute_toleration_for(TAINT_NODE_NOT_READY)
            && self.has_no_execute_toleration_for(TAINT_NODE_UNREACHABLE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().is_empty() {
            return Err(KestrelError::validation_failed(
                "Pod",
                "pod id is empty",
                "Pods are identified as 'namespace/name'",
            ));
        }
        validate_non_negative(&self.requests)?;
        validate_tolerations(&self.tolerations)?;
        if let Some(affinity) = &self.affinity {
            affinity.validate()?;
        }
        Ok(())
    }
}

fn validate_non_negative(quantities: &ResourceQuantities) -> Result<()> {
    match quantities.first_negative() {
        Some(name) => {
            let amount = match name.as_str() {
                "cpu" => format!("{}m", quantities.cpu_millicores),
                "memory" => quantities.memory_bytes.to_string(),
                other => quantities.extended.get(other).copied().unwrap_or(0).to_string(),
            };
            Err(KestrelError::invalid_quantity(name, amount))
        }
        None => Ok(()),
    }
}

/// Externally supplied disruption budget limiting voluntary evictions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisruptionBudget {
    pub name: String,
    /// Pods whose labels contain all these pairs are covered
    pub selector: BTreeMap<String, String>,
    /// How many covered pods may currently be disrupted
    pub disruptions_allowed: u32,
}

impl DisruptionBudget {
    /// Whether the budget covers `pod`. An empty selector covers nothing.
    pub fn covers(&self, pod: &Pod) -> bool {
        !self.selector.is_empty()
            && self
                .selector
                .iter()
                .all(|(k, v)| pod.labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taint::{TaintEffect, TolerationOperator};

    #[test]
    fn test_pod_id_namespaced() {
        let id = PodId::namespaced("default", "nginx");
        assert_eq!(id.as_str(), "default/nginx");
        assert_eq!(id.to_string(), "default/nginx");
    }

    #[test]
    fn test_budget_covers() {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), "db".to_string());
        let budget = DisruptionBudget {
            name: "db-pdb".to_string(),
            selector,
            disruptions_allowed: 1,
        };

        let db = Pod::new("default/db-0", ResourceQuantities::default()).with_label("app", "db");
        let web = Pod::new("default/web-0", ResourceQuantities::default()).with_label("app", "web");
        assert!(budget.covers(&db));
        assert!(!budget.covers(&web));
    }

    #[test]
    fn test_tolerates_node_conditions() {
        let pod = Pod::new("default/p", ResourceQuantities::default());
        assert!(!pod.tolerates_node_conditions());

        let pod = pod.with_toleration(Toleration {
            key: None,
            operator: TolerationOperator::Exists,
            ..Default::default()
        });
        assert!(pod.tolerates_node_conditions());

        let not_ready = Toleration::exists(TAINT_NODE_NOT_READY, Some(TaintEffect::NoExecute));
        let pod = Pod::new("default/q", ResourceQuantities::default()).with_toleration(not_ready);
        assert!(!pod.tolerates_node_conditions());
    }

    #[test]
    fn test_pod_validate_rejects_bad_toleration() {
        let pod = Pod::new("default/p", ResourceQuantities::default()).with_toleration(Toleration {
            key: Some("priority".to_string()),
            operator: TolerationOperator::Gt,
            value: Some("0550".to_string()),
            ..Default::default()
        });
        assert!(pod.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_pod_validate_rejects_negative_request() {
        let pod = Pod::new("default/p", ResourceQuantities::new(-4000, 0));
        assert!(matches!(
            pod.validate(),
            Err(KestrelError::InvalidQuantity { .. })
        ));

        let pod = Pod::new(
            "default/q",
            ResourceQuantities::new(100, 0).with_extended("example.com/gpu", -1),
        );
        assert!(pod.validate().is_err());

        let node = Node::new("node1", ResourceQuantities::new(1000, -1));
        assert!(node.validate().is_err());
    }

    #[test]
    fn test_node_ready_status() {
        let node = Node::new("node1", ResourceQuantities::new(1000, 1024));
        assert_eq!(node.ready_status(), Some(ConditionStatus::True));
    }
}
