use crate::affinity;
use crate::config::{FilterPlugin, PluginConfig};
use crate::toleration::try_tolerates;
use crate::types::{FilterCode, FilterResult, NodeInfo, SchedulingContext};
use kestrel_core::{NodeId, TaintEffect};
use std::collections::BTreeMap;
use tracing::debug;

/// Filter predicate trait
pub trait FilterPredicate: Send + Sync {
    /// Filter a node for the given pod
    fn filter(&self, context: &SchedulingContext, node: &NodeInfo) -> FilterResult;

    /// Name of the filter
    fn name(&self) -> &str;
}

/// Filter out cordoned nodes
pub struct NodeUnschedulable;

impl FilterPredicate for NodeUnschedulable {
    fn filter(&self, _context: &SchedulingContext, node: &NodeInfo) -> FilterResult {
        if node.node.unschedulable {
            return FilterResult::fail_unresolvable(
                node.id().clone(),
                "Node is unschedulable".to_string(),
            );
        }
        FilterResult::pass(node.id().clone())
    }

    fn name(&self) -> &str {
        "NodeUnschedulable"
    }
}

/// Filter for pod resource requirements
pub struct PodFitsResources;

impl FilterPredicate for PodFitsResources {
    fn filter(&self, context: &SchedulingContext, node: &NodeInfo) -> FilterResult {
        let available = node.available();
        let requests = &context.pod.requests;

        debug!(
            "Node {} has available {}, pod {} requests {}",
            node.id(),
            available,
            context.pod.id,
            requests
        );

        let missing = requests.insufficient(&available);
        if !missing.is_empty() {
            let reason = missing
                .iter()
                .map(|name| format!("Insufficient {}", name))
                .collect::<Vec<_>>()
                .join(", ");
            return FilterResult::fail(node.id().clone(), reason);
        }

        FilterResult::pass(node.id().clone())
    }

    fn name(&self) -> &str {
        "PodFitsResources"
    }
}

/// Filter for taints and tolerations.
///
/// Untolerated NoSchedule and NoExecute taints reject the node.
/// PreferNoSchedule taints only lower the score.
pub struct TaintToleration;

impl FilterPredicate for TaintToleration {
    fn filter(&self, context: &SchedulingContext, node: &NodeInfo) -> FilterResult {
        let tolerations = &context.pod.tolerations;

        for taint in &node.node.taints {
            if taint.effect == TaintEffect::PreferNoSchedule {
                continue;
            }

            let mut tolerated = false;
            for toleration in tolerations {
                match try_tolerates(toleration, taint) {
                    Ok(true) => {
                        tolerated = true;
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        debug!(
                            "Toleration {} of pod {} cannot match taint {}: {}",
                            toleration, context.pod.id, taint, e
                        );
                    }
                }
            }

            if !tolerated {
                return FilterResult::fail_unresolvable(
                    node.id().clone(),
                    format!("Pod does not tolerate taint {}", taint),
                );
            }
        }

        FilterResult::pass(node.id().clone())
    }

    fn name(&self) -> &str {
        "TaintToleration"
    }
}

/// Filter for nodeSelector and required node affinity
pub struct NodeAffinityRequired;

impl FilterPredicate for NodeAffinityRequired {
    fn filter(&self, context: &SchedulingContext, node: &NodeInfo) -> FilterResult {
        if !affinity::matches_node_selector(&context.pod, &node.node) {
            return FilterResult::fail_unresolvable(
                node.id().clone(),
                "Node does not match the pod's node selector".to_string(),
            );
        }
        if !affinity::required_matches(&context.pod, &node.node) {
            return FilterResult::fail_unresolvable(
                node.id().clone(),
                "Node does not match the pod's required node affinity".to_string(),
            );
        }
        FilterResult::pass(node.id().clone())
    }

    fn name(&self) -> &str {
        "NodeAffinityRequired"
    }
}

fn build_filter(plugin: FilterPlugin) -> Box<dyn FilterPredicate> {
    match plugin {
        FilterPlugin::Unschedulable => Box::new(NodeUnschedulable),
        FilterPlugin::ResourceFit => Box::new(PodFitsResources),
        FilterPlugin::TaintToleration => Box::new(TaintToleration),
        FilterPlugin::NodeAffinity => Box::new(NodeAffinityRequired),
    }
}

/// Get default filter predicates
pub fn default_filters() -> Vec<Box<dyn FilterPredicate>> {
    PluginConfig::default()
        .resolve_filters()
        .into_iter()
        .map(build_filter)
        .collect()
}

/// Result of running the filter pipeline for one pod
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    /// Node the pod is pinned to; no filter ran
    pub pinned: Option<NodeId>,
    /// Nodes that passed every filter, in node id order
    pub eligible: Vec<NodeId>,
    /// Failed filter results per rejected node
    pub failures: BTreeMap<NodeId, Vec<FilterResult>>,
}

impl FilterOutcome {
    /// Nodes rejected only by failures that evicting pods could resolve
    pub fn preemption_candidates(&self) -> Vec<NodeId> {
        self.failures
            .iter()
            .filter(|(_, results)| results.iter().all(|r| r.code == FilterCode::Unschedulable))
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Whether at least one node failed purely for lack of resources
    pub fn is_resource_driven(&self) -> bool {
        !self.preemption_candidates().is_empty()
    }

    /// One-line summary such as
    /// "0/3 nodes are available: 2 Insufficient cpu, 1 Node is unschedulable"
    pub fn summary(&self) -> String {
        let total = self.eligible.len() + self.failures.len();
        let mut reasons: BTreeMap<&str, usize> = BTreeMap::new();
        for results in self.failures.values() {
            for result in results {
                if let Some(reason) = result.reason.as_deref() {
                    *reasons.entry(reason).or_default() += 1;
                }
            }
        }
        let detail = reasons
            .iter()
            .map(|(reason, count)| format!("{} {}", count, reason))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}/{} nodes are available: {}", self.eligible.len(), total, detail)
    }
}

/// Ordered filter plugins, resolved once from a [`PluginConfig`]
pub struct FilterPipeline {
    filters: Vec<Box<dyn FilterPredicate>>,
}

impl FilterPipeline {
    pub fn new(filters: Vec<Box<dyn FilterPredicate>>) -> Self {
        Self { filters }
    }

    pub fn from_config(config: &PluginConfig) -> Self {
        Self::new(config.resolve_filters().into_iter().map(build_filter).collect())
    }

    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run every filter against every node.
    ///
    /// A pod with an explicit node pin skips all filters.
    pub fn run(&self, context: &SchedulingContext, nodes: &[NodeInfo]) -> FilterOutcome {
        if let Some(pinned) = &context.pod.node_name {
            debug!(
                "Pod {} is pinned to node {}, skipping filters",
                context.pod.id, pinned
            );
            return FilterOutcome {
                pinned: Some(pinned.clone()),
                ..Default::default()
            };
        }

        let mut outcome = FilterOutcome::default();

        for node in nodes {
            let mut failed = Vec::new();

            for filter in &self.filters {
                let result = filter.filter(context, node);
                if !result.passed() {
                    debug!(
                        "Node {} filtered out by {}: {}",
                        node.id(),
                        filter.name(),
                        result.reason.as_deref().unwrap_or_default()
                    );
                    failed.push(result);
                }
            }

            if failed.is_empty() {
                outcome.eligible.push(node.id().clone());
            } else {
                outcome.failures.insert(node.id().clone(), failed);
            }
        }

        outcome.eligible.sort();
        outcome
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new(default_filters())
    }
}
