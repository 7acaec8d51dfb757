use crate::affinity;
use crate::config::{PluginConfig, ScorePlugin};
use crate::toleration::untolerated_taints;
use crate::types::{NodeInfo, SchedulingContext, ScoreResult};
use kestrel_core::{NodeId, TaintEffect};
use std::cmp::Ordering;
use tracing::debug;

/// Score subtracted per untolerated PreferNoSchedule taint, before weighting
pub const PREFER_NO_SCHEDULE_PENALTY: i64 = 100;

/// Scoring function trait
pub trait ScoreFunction: Send + Sync {
    /// Score a node for the given pod (higher is better)
    fn score(&self, context: &SchedulingContext, node: &NodeInfo) -> ScoreResult;

    /// Name of the scoring function
    fn name(&self) -> &str;
}

/// Percentage of `capacity` left free after `used` is placed
fn free_percent(capacity: i64, used: i64) -> i64 {
    if capacity <= 0 {
        return 0;
    }
    ((capacity - used).max(0) as i128 * 100 / capacity as i128) as i64
}

/// Score based on least allocated resources
pub struct LeastAllocated;

impl ScoreFunction for LeastAllocated {
    fn score(&self, context: &SchedulingContext, node: &NodeInfo) -> ScoreResult {
        let allocatable = &node.node.allocatable;
        let after = node.requested.add(&context.pod.requests);

        let cpu = free_percent(allocatable.cpu_millicores, after.cpu_millicores);
        let memory = free_percent(allocatable.memory_bytes, after.memory_bytes);
        let score = (cpu + memory) / 2;

        debug!(
            "Node {} least-allocated score: {} (cpu free {}%, memory free {}%)",
            node.id(),
            score,
            cpu,
            memory
        );

        ScoreResult::new(node.id().clone(), score)
    }

    fn name(&self) -> &str {
        "LeastAllocated"
    }
}

/// Score based on balanced resource allocation
pub struct BalancedAllocation;

impl ScoreFunction for BalancedAllocation {
    fn score(&self, context: &SchedulingContext, node: &NodeInfo) -> ScoreResult {
        let allocatable = &node.node.allocatable;
        if allocatable.cpu_millicores <= 0 || allocatable.memory_bytes <= 0 {
            return ScoreResult::new(node.id().clone(), 0);
        }

        let after = node.requested.add(&context.pod.requests);
        let cpu_fraction = after.cpu_millicores as f64 / allocatable.cpu_millicores as f64;
        let memory_fraction = after.memory_bytes as f64 / allocatable.memory_bytes as f64;

        // Prefer balanced resource usage (CPU and memory usage should be similar)
        let variance = (cpu_fraction - memory_fraction).abs();
        let score = ((1.0 - variance) * 100.0).clamp(0.0, 100.0) as i64;

        debug!(
            "Node {} balanced allocation score: {} (variance: {:.3})",
            node.id(),
            score,
            variance
        );

        ScoreResult::new(node.id().clone(), score)
    }

    fn name(&self) -> &str {
        "BalancedAllocation"
    }
}

/// Prefer nodes that already hold the pod's container images
pub struct ImageLocality;

impl ScoreFunction for ImageLocality {
    fn score(&self, context: &SchedulingContext, node: &NodeInfo) -> ScoreResult {
        let wanted = &context.pod.images;
        if wanted.is_empty() {
            return ScoreResult::new(node.id().clone(), 0);
        }

        let present = wanted
            .iter()
            .filter(|image| {
                node.node
                    .images
                    .iter()
                    .any(|cached| cached.names.iter().any(|name| name == *image))
            })
            .count();

        let score = present as i64 * 100 / wanted.len() as i64;
        ScoreResult::new(node.id().clone(), score)
    }

    fn name(&self) -> &str {
        "ImageLocality"
    }
}

/// Sum of matching preferred node-affinity weights
pub struct NodeAffinityPreferred;

impl ScoreFunction for NodeAffinityPreferred {
    fn score(&self, context: &SchedulingContext, node: &NodeInfo) -> ScoreResult {
        ScoreResult::new(
            node.id().clone(),
            affinity::preferred_weight(&context.pod, &node.node),
        )
    }

    fn name(&self) -> &str {
        "NodeAffinityPreferred"
    }
}

/// Penalty for untolerated PreferNoSchedule taints
pub struct TaintTolerationPenalty;

impl ScoreFunction for TaintTolerationPenalty {
    fn score(&self, context: &SchedulingContext, node: &NodeInfo) -> ScoreResult {
        let count = untolerated_taints(
            &context.pod.tolerations,
            &node.node.taints,
            &[TaintEffect::PreferNoSchedule],
        )
        .len() as i64;

        ScoreResult::new(node.id().clone(), -count * PREFER_NO_SCHEDULE_PENALTY)
    }

    fn name(&self) -> &str {
        "TaintTolerationPenalty"
    }
}

fn build_score(plugin: ScorePlugin) -> Box<dyn ScoreFunction> {
    match plugin {
        ScorePlugin::LeastAllocated => Box::new(LeastAllocated),
        ScorePlugin::BalancedAllocation => Box::new(BalancedAllocation),
        ScorePlugin::ImageLocality => Box::new(ImageLocality),
        ScorePlugin::NodeAffinity => Box::new(NodeAffinityPreferred),
        ScorePlugin::TaintToleration => Box::new(TaintTolerationPenalty),
    }
}

/// Get default scoring functions with their weights
pub fn default_scores() -> Vec<(Box<dyn ScoreFunction>, i64)> {
    PluginConfig::default()
        .resolve_scores()
        .into_iter()
        .map(|(plugin, weight)| (build_score(plugin), weight))
        .collect()
}

/// Weighted total of one node
#[derive(Debug, Clone)]
pub struct NodeScore {
    pub node: NodeId,
    pub total: i64,
    /// Unweighted plugin scores, in plugin order
    pub breakdown: Vec<ScoreResult>,
}

/// Calculate the weighted sum of plugin scores
pub fn calculate_weighted_score(scores: &[(ScoreResult, i64)]) -> i64 {
    scores
        .iter()
        .map(|(result, weight)| result.score.saturating_mul(*weight))
        .fold(0i64, i64::saturating_add)
}

/// Order by highest total, then smallest node id
fn rank(a: &NodeScore, b: &NodeScore) -> Ordering {
    b.total.cmp(&a.total).then_with(|| a.node.cmp(&b.node))
}

/// Weighted score plugins, resolved once from a [`PluginConfig`]
pub struct ScoringPipeline {
    scorers: Vec<(Box<dyn ScoreFunction>, i64)>,
}

impl ScoringPipeline {
    pub fn new(scorers: Vec<(Box<dyn ScoreFunction>, i64)>) -> Self {
        Self { scorers }
    }

    pub fn from_config(config: &PluginConfig) -> Self {
        Self::new(
            config
                .resolve_scores()
                .into_iter()
                .map(|(plugin, weight)| (build_score(plugin), weight))
                .collect(),
        )
    }

    pub fn names(&self) -> Vec<&str> {
        self.scorers.iter().map(|(s, _)| s.name()).collect()
    }

    /// Score every node, best first
    pub fn score_nodes(&self, context: &SchedulingContext, nodes: &[&NodeInfo]) -> Vec<NodeScore> {
        let mut scored: Vec<NodeScore> = nodes
            .iter()
            .map(|node| {
                let weighted: Vec<(ScoreResult, i64)> = self
                    .scorers
                    .iter()
                    .map(|(scorer, weight)| (scorer.score(context, node), *weight))
                    .collect();
                let total = calculate_weighted_score(&weighted);
                debug!("Node {} total score for pod {}: {}", node.id(), context.pod.id, total);
                NodeScore {
                    node: node.id().clone(),
                    total,
                    breakdown: weighted.into_iter().map(|(result, _)| result).collect(),
                }
            })
            .collect();

        scored.sort_by(rank);
        scored
    }

    /// Best node: highest total, ties to the smallest node id
    pub fn select_best(
        &self,
        context: &SchedulingContext,
        nodes: &[&NodeInfo],
    ) -> Option<NodeScore> {
        self.score_nodes(context, nodes).into_iter().next()
    }
}

impl Default for ScoringPipeline {
    fn default() -> Self {
        Self::new(default_scores())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::{
        ContainerImage, Node, NodeAffinity, NodeSelectorOperator, NodeSelectorRequirement,
        NodeSelectorTerm, Pod, PreferredSchedulingTerm, ResourceQuantities, Taint, Toleration,
    };

    fn create_test_node(name: &str, cpu: i64, memory: i64) -> NodeInfo {
        NodeInfo::new(Node::new(name, ResourceQuantities::new(cpu, memory)))
    }

    fn create_test_pod(cpu: i64, memory: i64) -> Pod {
        Pod::new("default/test-pod", ResourceQuantities::new(cpu, memory))
    }

    #[test]
    fn test_least_allocated() {
        let node1 = create_test_node("node1", 4000, 8 << 30);
        let node2 = create_test_node("node2", 4000, 8 << 30);
        let context = SchedulingContext::new(create_test_pod(1000, 2 << 30));

        let score1 = LeastAllocated.score(&context, &node1);
        let score2 = LeastAllocated.score(&context, &node2);

        // Both nodes should have same score (same resources, same request)
        assert_eq!(score1.score, score2.score);
        assert_eq!(score1.score, 75);
    }

    #[test]
    fn test_balanced_allocation() {
        let node = create_test_node("node1", 4000, 4 << 30);
        let balanced = SchedulingContext::new(create_test_pod(2000, 2 << 30));
        let skewed = SchedulingContext::new(create_test_pod(4000, 0));

        assert_eq!(BalancedAllocation.score(&balanced, &node).score, 100);
        assert_eq!(BalancedAllocation.score(&skewed, &node).score, 0);
    }

    #[test]
    fn test_image_locality() {
        let mut node = create_test_node("node1", 4000, 8 << 30);
        node.node.images = vec![ContainerImage {
            names: vec!["nginx:1.27".to_string()],
            size_bytes: 50 << 20,
        }];
        let mut pod = create_test_pod(100, 1024);
        pod.images = vec!["nginx:1.27".to_string(), "envoy:1.31".to_string()];

        assert_eq!(ImageLocality.score(&SchedulingContext::new(pod), &node).score, 50);
    }

    #[test]
    fn test_prefer_no_schedule_penalty() {
        let mut node = create_test_node("node1", 4000, 8 << 30);
        node.node.taints = vec![
            Taint::new("key1", None, TaintEffect::PreferNoSchedule),
            Taint::new("key2", None, TaintEffect::PreferNoSchedule),
        ];
        let pod = create_test_pod(100, 1024).with_toleration(Toleration::exists("key1", None));

        let result = TaintTolerationPenalty.score(&SchedulingContext::new(pod), &node);
        assert_eq!(result.score, -PREFER_NO_SCHEDULE_PENALTY);
    }

    #[test]
    fn test_calculate_weighted_score() {
        let scores = vec![
            (ScoreResult::new(NodeId::from("node1"), 80), 1),
            (ScoreResult::new(NodeId::from("node1"), 60), 2),
        ];
        assert_eq!(calculate_weighted_score(&scores), 200);
    }

    #[test]
    fn test_ties_go_to_smallest_node_id() {
        let b = create_test_node("node-b", 4000, 8 << 30);
        let a = create_test_node("node-a", 4000, 8 << 30);
        let context = SchedulingContext::new(create_test_pod(1000, 1 << 30));

        let best = ScoringPipeline::default().select_best(&context, &[&b, &a]).unwrap();
        assert_eq!(best.node, NodeId::from("node-a"));
    }

    #[test]
    fn test_preferred_affinity_wins_over_tie() {
        let a = create_test_node("node-a", 4000, 8 << 30);
        let mut b = create_test_node("node-b", 4000, 8 << 30);
        b.node.labels.insert("disktype".to_string(), "ssd".to_string());

        let mut pod = create_test_pod(1000, 1 << 30);
        pod.affinity = Some(NodeAffinity {
            required: None,
            preferred: vec![PreferredSchedulingTerm {
                weight: 10,
                preference: NodeSelectorTerm::with_expressions(vec![NodeSelectorRequirement::new(
                    "disktype",
                    NodeSelectorOperator::In,
                    &["ssd"],
                )]),
            }],
        });
        let context = SchedulingContext::new(pod);

        let scores = ScoringPipeline::default().score_nodes(&context, &[&a, &b]);
        assert_eq!(scores[0].node, NodeId::from("node-b"));
        assert_eq!(scores[0].total - scores[1].total, 20);
    }
}
