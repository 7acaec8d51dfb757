// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Kestrel operations
#[derive(Error, Debug, Diagnostic)]
pub enum KestrelError {
    /// Validation failed (malformed taint, toleration or affinity term)
    #[error("Validation failed for {resource_type}: {details}")]
    #[diagnostic(
        code(kestrel::validation_failed),
        help("{help_text}")
    )]
    ValidationFailed {
        #[allow(unused)]
        resource_type: String,
        #[allow(unused)]
        details: String,
        #[allow(unused)]
        help_text: String,
    },

    /// Resource quantity could not be parsed
    #[error("Invalid quantity '{value}' for {resource}")]
    #[diagnostic(
        code(kestrel::invalid_quantity),
        help("Use Kubernetes quantity forms such as '500m', '2', '0.5', '128Mi' or '1Gi'")
    )]
    InvalidQuantity {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        value: String,
    },

    /// Node not present in the cluster snapshot
    #[error("Node not found: {node_id}")]
    #[diagnostic(
        code(kestrel::node_not_found),
        help("The node may have been removed since the snapshot was taken; refresh and retry")
    )]
    NodeNotFound {
        #[allow(unused)]
        node_id: String,
    },

    /// Pod not present in the cluster snapshot
    #[error("Pod not found: {pod_id}")]
    #[diagnostic(
        code(kestrel::pod_not_found),
        help("Verify the pod id has the form 'namespace/name'")
    )]
    PodNotFound {
        #[allow(unused)]
        pod_id: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(kestrel::serialization_error),
        help("Ensure the snapshot is valid JSON in the ClusterSnapshot format")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(kestrel::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for Kestrel operations
pub type Result<T> = std::result::Result<T, KestrelError>;

impl KestrelError {
    /// Create a ValidationFailed error
    pub fn validation_failed(
        resource_type: impl Into<String>,
        details: impl Into<String>,
        help_text: impl Into<String>,
    ) -> Self {
        Self::ValidationFailed {
            resource_type: resource_type.into(),
            details: details.into(),
            help_text: help_text.into(),
        }
    }

    /// Create an InvalidQuantity error
    pub fn invalid_quantity(resource: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            resource: resource.into(),
            value: value.into(),
        }
    }

    /// Create a NodeNotFound error
    pub fn node_not_found(node_id: impl Into<String>) -> Self {
        Self::NodeNotFound {
            node_id: node_id.into(),
        }
    }

    /// Create a PodNotFound error
    pub fn pod_not_found(pod_id: impl Into<String>) -> Self {
        Self::PodNotFound {
            pod_id: pod_id.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether this error is an admission-time validation failure
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = KestrelError::node_not_found("node-1");
        assert!(matches!(err, KestrelError::NodeNotFound { .. }));

        let err = KestrelError::validation_failed(
            "Toleration",
            "value '0550' has a leading zero",
            "Use a plain signed 64-bit integer",
        );
        assert!(err.is_validation());
        assert!(err.to_string().contains("Toleration"));
    }
}
