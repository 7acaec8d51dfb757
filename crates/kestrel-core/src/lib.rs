//! Kestrel Core - Fundamental types and traits for the Kestrel scheduling engine
//!
//! This crate provides:
//! - Node, Pod, Taint, Toleration and node-affinity types
//! - Resource quantity parsing and arithmetic
//! - Error types with miette diagnostics
//! - Conversion from k8s-openapi objects
//! - Collaborator traits (state provider, terminator, event emitter)

pub mod affinity;
pub mod convert;
pub mod error;
pub mod events;
pub mod resources;
pub mod snapshot;
pub mod taint;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use affinity::{
    NodeAffinity, NodeSelectorOperator, NodeSelectorRequirement, NodeSelectorTerm,
    PreferredSchedulingTerm,
};
pub use convert::{node_from_k8s, pod_from_k8s};
pub use error::{KestrelError, Result};
pub use events::{SchedulingEvent, SchedulingEventKind};
pub use resources::{is_qualified_name, is_valid_name, ResourceQuantities};
pub use snapshot::{ClusterSnapshot, StaticStateProvider};
pub use taint::{
    parse_strict_i64, validate_taints, validate_tolerations, Taint, TaintEffect, Toleration,
    TolerationOperator, TAINT_NODE_NOT_READY, TAINT_NODE_UNREACHABLE, TAINT_NODE_UNSCHEDULABLE,
};
pub use traits::{ClusterStateProvider, EventEmitter, PodTerminator};
pub use types::{
    ConditionStatus, ContainerImage, DisruptionBudget, Node, NodeCondition, NodeId, Pod, PodId,
    PodPhase, PreemptionPolicy,
};

// Re-export k8s-openapi for callers converting Kubernetes objects
pub use k8s_openapi;

/// Serialize a value to JSON
pub fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        KestrelError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a value to pretty JSON
pub fn to_json_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| {
        KestrelError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a value from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        KestrelError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}
