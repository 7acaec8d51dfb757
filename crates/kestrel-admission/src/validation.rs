use crate::error::{AdmissionError, Result};
use crate::request::{AdmissionRequest, Operation};
use k8s_openapi::api::core::v1 as k8s;
use kestrel_core::{node_from_k8s, pod_from_k8s, Node, Pod};
use serde_json::Value;
use tracing::debug;

/// A decoded object that passed validation
#[derive(Debug, Clone)]
pub enum AdmittedObject {
    Pod { raw: k8s::Pod, pod: Pod },
    Node { raw: k8s::Node, node: Node },
}

/// Decode and validate the object of `request` as a whole.
///
/// Returns `None` for operations or kinds without rules (deletes, other
/// kinds). Any violation fails the entire object.
pub fn validate_request(request: &AdmissionRequest) -> Result<Option<AdmittedObject>> {
    if matches!(request.operation, Operation::Delete | Operation::Connect) {
        return Ok(None);
    }

    match request.kind.as_str() {
        "Pod" => {
            let raw: k8s::Pod = decode(request)?;
            let pod = pod_from_k8s(&with_namespace(raw.clone(), request))?;
            debug!("Pod {} passed validation", pod.id);
            Ok(Some(AdmittedObject::Pod { raw, pod }))
        }
        "Node" => {
            let raw: k8s::Node = decode(request)?;
            let node = node_from_k8s(&raw)?;
            debug!("Node {} passed validation", node.id);
            Ok(Some(AdmittedObject::Node { raw, node }))
        }
        other => {
            debug!("No admission rules for kind {}", other);
            Ok(None)
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(request: &AdmissionRequest) -> Result<T> {
    let object = request
        .object
        .clone()
        .filter(|o| !o.is_null())
        .ok_or_else(|| {
            AdmissionError::malformed(format!("{} request carries no object", request.kind))
        })?;
    if !matches!(object, Value::Object(_)) {
        return Err(AdmissionError::malformed(format!(
            "{} object must be a JSON object",
            request.kind
        )));
    }
    Ok(serde_json::from_value(object)?)
}

fn with_namespace(mut pod: k8s::Pod, request: &AdmissionRequest) -> k8s::Pod {
    if pod.metadata.namespace.is_none() {
        pod.metadata.namespace = request.namespace.clone();
    }
    pod
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod_json(tolerations: Value) -> Value {
        json!({
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {
                "containers": [{"name": "web", "image": "nginx:1.27"}],
                "tolerations": tolerations
            }
        })
    }

    #[test]
    fn test_valid_pod() {
        let request = AdmissionRequest::new(
            "Pod",
            Operation::Create,
            pod_json(json!([{"key": "key1", "operator": "Exists", "effect": "NoExecute"}])),
        );
        match validate_request(&request).unwrap() {
            Some(AdmittedObject::Pod { pod, .. }) => {
                assert_eq!(pod.id.as_str(), "default/web");
                assert_eq!(pod.tolerations.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_leading_zero_numeral_rejects_whole_pod() {
        let request = AdmissionRequest::new(
            "Pod",
            Operation::Create,
            pod_json(json!([
                {"key": "key1", "operator": "Exists", "effect": "NoExecute"},
                {"key": "priority", "operator": "Gt", "value": "0550"}
            ])),
        );
        let err = validate_request(&request).unwrap_err();
        assert!(matches!(err, AdmissionError::Rejected { .. }));
    }

    #[test]
    fn test_malformed_object() {
        let request = AdmissionRequest::new("Pod", Operation::Create, json!("not an object"));
        assert!(matches!(
            validate_request(&request).unwrap_err(),
            AdmissionError::Malformed { .. }
        ));

        let request = AdmissionRequest::new(
            "Pod",
            Operation::Create,
            json!({"metadata": {"name": "web"}, "spec": {"containers": "nope"}}),
        );
        assert!(matches!(
            validate_request(&request).unwrap_err(),
            AdmissionError::Malformed { .. }
        ));
    }

    #[test]
    fn test_invalid_node_taint_effect() {
        let request = AdmissionRequest::new(
            "Node",
            Operation::Update,
            json!({
                "metadata": {"name": "node1"},
                "spec": {"taints": [{"key": "key1", "effect": "Sometimes"}]}
            }),
        );
        assert!(matches!(
            validate_request(&request).unwrap_err(),
            AdmissionError::Rejected { .. }
        ));
    }

    #[test]
    fn test_delete_and_unknown_kinds_pass_through() {
        let mut request = AdmissionRequest::new("Pod", Operation::Delete, json!(null));
        request.object = None;
        assert!(validate_request(&request).unwrap().is_none());

        let request = AdmissionRequest::new("ConfigMap", Operation::Create, json!({}));
        assert!(validate_request(&request).unwrap().is_none());
    }

    #[test]
    fn test_request_namespace_fills_missing_namespace() {
        let request = AdmissionRequest::new(
            "Pod",
            Operation::Create,
            json!({"metadata": {"name": "web"}, "spec": {"containers": [{"name": "web"}]}}),
        )
        .with_namespace("team-a");
        match validate_request(&request).unwrap() {
            Some(AdmittedObject::Pod { pod, .. }) => assert_eq!(pod.id.as_str(), "team-a/web"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
