use crate::error::{KestrelError, Result};
use crate::traits::ClusterStateProvider;
use crate::types::{DisruptionBudget, Node, Pod};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Immutable view of the cluster handed to the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub pods: Vec<Pod>,
    #[serde(default)]
    pub budgets: Vec<DisruptionBudget>,
}

impl ClusterSnapshot {
    pub fn new(nodes: Vec<Node>, pods: Vec<Pod>) -> Self {
        Self {
            nodes,
            pods,
            budgets: Vec::new(),
        }
    }

    /// Load a snapshot from a JSON file and validate every object in it
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            KestrelError::serialization_error(
                format!("Failed to read snapshot {}: {}", path.display(), e),
                Some(Box::new(e)),
            )
        })?;
        let snapshot: ClusterSnapshot = crate::from_json(&data)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            node.validate()?;
        }
        for pod in &self.pods {
            pod.validate()?;
        }
        Ok(())
    }

    /// Pods not yet bound to any node
    pub fn pending_pods(&self) -> impl Iterator<Item = &Pod> {
        self.pods.iter().filter(|p| !p.is_bound())
    }
}

/// Provider serving a fixed snapshot
#[derive(Debug, Clone)]
pub struct StaticStateProvider {
    snapshot: ClusterSnapshot,
}

impl StaticStateProvider {
    pub fn new(snapshot: ClusterSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl ClusterStateProvider for StaticStateProvider {
    async fn snapshot(&self) -> Result<ClusterSnapshot> {
        Ok(self.snapshot.clone())
    }
}
