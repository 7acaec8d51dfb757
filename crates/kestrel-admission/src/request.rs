use json_patch::Patch;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Operation being admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

/// Structured admission request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    /// Echoed back in the response
    pub uid: String,
    /// Object kind, e.g. "Pod" or "Node"
    pub kind: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// The object as submitted; absent for DELETE
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
}

impl AdmissionRequest {
    pub fn new(kind: impl Into<String>, operation: Operation, object: Value) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            kind: kind.into(),
            operation,
            namespace: None,
            object: Some(object),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Structured admission response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// RFC 6902 operations to apply to the submitted object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
}

impl AdmissionResponse {
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            message: None,
            patch: None,
        }
    }

    pub fn deny(uid: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            message: Some(message.into()),
            patch: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach patch operations; an empty patch is dropped
    pub fn with_patch(mut self, patch: Patch) -> Self {
        self.patch = if patch.0.is_empty() { None } else { Some(patch) };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let request: AdmissionRequest = serde_json::from_value(json!({
            "uid": "abc",
            "kind": "Pod",
            "operation": "CREATE",
            "namespace": "default",
            "object": {"metadata": {"name": "nginx"}}
        }))
        .unwrap();

        assert_eq!(request.operation, Operation::Create);
        assert_eq!(request.namespace.as_deref(), Some("default"));
        assert!(request.object.is_some());
    }

    #[test]
    fn test_empty_patch_is_dropped() {
        let response = AdmissionResponse::allow("abc").with_patch(Patch(Vec::new()));
        assert!(response.patch.is_none());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, json!({"uid": "abc", "allowed": true}));
    }
}
