use crate::error::Result;
use json_patch::Patch;
use k8s_openapi::api::core::v1 as k8s;
use kestrel_core::{Pod, TAINT_NODE_NOT_READY, TAINT_NODE_UNREACHABLE};
use serde_json::{json, Value};
use tracing::debug;

/// Patch adding the node-condition tolerations a pod does not declare.
///
/// `raw` is the object as submitted and `pod` its validated form. A pod
/// that already tolerates both keys gets an empty patch.
pub fn default_tolerations_patch(raw: &k8s::Pod, pod: &Pod, seconds: i64) -> Result<Patch> {
    if pod.tolerates_node_conditions() {
        return Ok(Patch(Vec::new()));
    }

    let missing: Vec<Value> = [TAINT_NODE_NOT_READY, TAINT_NODE_UNREACHABLE]
        .into_iter()
        .filter(|key| !pod.has_no_execute_toleration_for(key))
        .map(|key| condition_toleration(key, seconds))
        .collect::<Result<_>>()?;

    debug!(
        "Adding {} default toleration(s) to pod {}",
        missing.len(),
        pod.id
    );

    let has_list = raw
        .spec
        .as_ref()
        .is_some_and(|spec| spec.tolerations.is_some());

    let ops: Vec<Value> = if has_list {
        missing
            .into_iter()
            .map(|value| json!({"op": "add", "path": "/spec/tolerations/-", "value": value}))
            .collect()
    } else {
        vec![json!({"op": "add", "path": "/spec/tolerations", "value": missing})]
    };

    Ok(serde_json::from_value(Value::Array(ops))?)
}

fn condition_toleration(key: &str, seconds: i64) -> Result<Value> {
    let toleration = k8s::Toleration {
        key: Some(key.to_string()),
        operator: Some("Exists".to_string()),
        effect: Some("NoExecute".to_string()),
        toleration_seconds: Some(seconds),
        value: None,
    };
    Ok(serde_json::to_value(toleration)?)
}
