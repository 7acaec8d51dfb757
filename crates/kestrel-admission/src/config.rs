use crate::policy::FailurePolicy;
use std::time::Duration;

/// Configuration for the admission controller
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Applied when a webhook fails or times out
    pub failure_policy: FailurePolicy,
    /// `tolerationSeconds` of the injected not-ready/unreachable tolerations
    pub default_toleration_seconds: i64,
    /// Upper bound on a single webhook call
    pub webhook_timeout: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Fail,
            default_toleration_seconds: 300,
            webhook_timeout: Duration::from_secs(10),
        }
    }
}
