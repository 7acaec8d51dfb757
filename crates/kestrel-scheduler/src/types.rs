use kestrel_core::{Node, NodeId, Pod, ResourceQuantities};

/// Scheduling context for one pending pod
#[derive(Debug, Clone)]
pub struct SchedulingContext {
    /// Pod to be scheduled
    pub pod: Pod,
}

impl SchedulingContext {
    /// Create a new scheduling context
    pub fn new(pod: Pod) -> Self {
        Self { pod }
    }
}

/// A node together with what is already placed on it
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node: Node,
    /// Sum of requests of the pods placed on the node
    pub requested: ResourceQuantities,
    /// Pods placed on the node
    pub pods: Vec<Pod>,
}

impl NodeInfo {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            requested: ResourceQuantities::default(),
            pods: Vec::new(),
        }
    }

    pub fn with_pod(mut self, pod: Pod) -> Self {
        self.add_pod(pod);
        self
    }

    pub fn add_pod(&mut self, pod: Pod) {
        self.requested = self.requested.add(&pod.requests);
        self.pods.push(pod);
    }

    pub fn id(&self) -> &NodeId {
        &self.node.id
    }

    /// Unallocated capacity
    pub fn available(&self) -> ResourceQuantities {
        self.node.allocatable.sub(&self.requested)
    }
}

/// Outcome of a filter plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterCode {
    Success,
    /// Failed, but evicting pods from the node may fix it
    Unschedulable,
    /// Failed, and preemption cannot fix it
    UnschedulableAndUnresolvable,
}

/// Result of filtering a node
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// Node id
    pub node_name: NodeId,
    pub code: FilterCode,
    /// Reason for failure (if any)
    pub reason: Option<String>,
}

impl FilterResult {
    /// Create a passing filter result
    pub fn pass(node_name: NodeId) -> Self {
        Self {
            node_name,
            code: FilterCode::Success,
            reason: None,
        }
    }

    /// Create a failing result that preemption may resolve
    pub fn fail(node_name: NodeId, reason: String) -> Self {
        Self {
            node_name,
            code: FilterCode::Unschedulable,
            reason: Some(reason),
        }
    }

    /// Create a failing result that preemption cannot resolve
    pub fn fail_unresolvable(node_name: NodeId, reason: String) -> Self {
        Self {
            node_name,
            code: FilterCode::UnschedulableAndUnresolvable,
            reason: Some(reason),
        }
    }

    pub fn passed(&self) -> bool {
        self.code == FilterCode::Success
    }
}

/// Result of scoring a node
#[derive(Debug, Clone)]
pub struct ScoreResult {
    /// Node id
    pub node_name: NodeId,
    /// Plugin score before weighting; higher is better
    pub score: i64,
}

impl ScoreResult {
    /// Create a new score result
    pub fn new(node_name: NodeId, score: i64) -> Self {
        Self { node_name, score }
    }
}
