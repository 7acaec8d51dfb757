use crate::config::AdmissionConfig;
use crate::defaults::default_tolerations_patch;
use crate::error::{AdmissionError, Result};
use crate::request::{AdmissionRequest, AdmissionResponse, Operation};
use crate::validation::{validate_request, AdmittedObject};
use async_trait::async_trait;
use json_patch::Patch;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// External admission collaborator consulted after validation
#[async_trait]
pub trait Webhook: Send + Sync {
    fn name(&self) -> &str;

    /// Review a validated request, returning extra patch operations
    async fn review(&self, request: &AdmissionRequest) -> Result<Patch>;
}

/// Admission boundary for pods and nodes
pub struct AdmissionController {
    config: AdmissionConfig,
    webhooks: Vec<Arc<dyn Webhook>>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            webhooks: Vec::new(),
        }
    }

    pub fn with_webhook(mut self, webhook: Arc<dyn Webhook>) -> Self {
        self.webhooks.push(webhook);
        self
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Admit a request. Never fails; errors become a denial, except
    /// collaborator failures the Ignore policy skips.
    pub async fn admit(&self, request: &AdmissionRequest) -> AdmissionResponse {
        match self.evaluate(request).await {
            Ok((patch, skipped)) => {
                debug!(
                    "Admitted {} {} ({} patch op(s))",
                    request.kind,
                    request.uid,
                    patch.0.len()
                );
                let response = AdmissionResponse::allow(&request.uid).with_patch(patch);
                if skipped.is_empty() {
                    response
                } else {
                    response.with_message(skipped.join("; "))
                }
            }
            Err(e) => {
                info!("Admission of {} {} failed: {}", request.kind, request.uid, e);
                self.config.failure_policy.resolve(&request.uid, &e)
            }
        }
    }

    /// Patch for an admitted request, plus the failures the policy skipped
    async fn evaluate(&self, request: &AdmissionRequest) -> Result<(Patch, Vec<String>)> {
        let Some(object) = validate_request(request)? else {
            return Ok((Patch(Vec::new()), Vec::new()));
        };

        let mut ops = Vec::new();
        if let (Operation::Create, AdmittedObject::Pod { raw, pod }) = (request.operation, &object)
        {
            let seconds = self.config.default_toleration_seconds;
            ops.extend(default_tolerations_patch(raw, pod, seconds)?.0);
        }

        let mut skipped = Vec::new();
        for webhook in &self.webhooks {
            match self.call(webhook.as_ref(), request).await {
                Ok(patch) => ops.extend(patch.0),
                Err(e) if self.config.failure_policy.ignores(&e) => {
                    warn!("Skipping webhook {} for {}: {}", webhook.name(), request.uid, e);
                    skipped.push(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }

        Ok((Patch(ops), skipped))
    }

    async fn call(&self, webhook: &dyn Webhook, request: &AdmissionRequest) -> Result<Patch> {
        match tokio::time::timeout(self.config.webhook_timeout, webhook.review(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Webhook {} did not answer within {:?}",
                    webhook.name(),
                    self.config.webhook_timeout
                );
                Err(AdmissionError::collaborator_unavailable(
                    webhook.name(),
                    format!("no answer within {:?}", self.config.webhook_timeout),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Labeler;

    #[async_trait]
    impl Webhook for Labeler {
        fn name(&self) -> &str {
            "labeler"
        }

        async fn review(&self, _request: &AdmissionRequest) -> Result<Patch> {
            Ok(serde_json::from_value(json!([
                {"op": "add", "path": "/metadata/labels", "value": {"admitted": "true"}}
            ]))?)
        }
    }

    fn pod_request() -> AdmissionRequest {
        AdmissionRequest::new(
            "Pod",
            Operation::Create,
            json!({"metadata": {"name": "web"}, "spec": {"containers": [{"name": "web"}]}}),
        )
    }

    #[tokio::test]
    async fn test_webhook_patch_is_merged() {
        let controller =
            AdmissionController::new(AdmissionConfig::default()).with_webhook(Arc::new(Labeler));
        let response = controller.admit(&pod_request()).await;

        assert!(response.allowed);
        let ops = serde_json::to_value(response.patch.unwrap()).unwrap();
        assert_eq!(ops.as_array().unwrap().len(), 2);
        assert_eq!(ops[0]["path"], "/spec/tolerations");
        assert_eq!(ops[1]["path"], "/metadata/labels");
    }

    #[tokio::test]
    async fn test_update_is_validated_without_defaults() {
        let controller = AdmissionController::new(AdmissionConfig::default());
        let mut request = pod_request();
        request.operation = Operation::Update;

        let response = controller.admit(&request).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
        assert_eq!(response.uid, request.uid);
    }

    #[tokio::test]
    async fn test_malformed_is_denied_under_ignore() {
        let config = AdmissionConfig {
            failure_policy: crate::FailurePolicy::Ignore,
            ..Default::default()
        };
        let controller = AdmissionController::new(config);
        let request = AdmissionRequest::new("Pod", Operation::Create, json!([1, 2]));

        let response = controller.admit(&request).await;
        assert!(!response.allowed);
        assert!(response.message.unwrap().contains("Malformed"));
    }
}
