// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use kestrel_core::KestrelError;
use miette::Diagnostic;
use thiserror::Error;

/// Admission error type
#[derive(Error, Debug, Diagnostic)]
pub enum AdmissionError {
    /// The object violates a validation rule
    #[error("Admission rejected: {reason}")]
    #[diagnostic(
        code(admission::rejected),
        help("Fix the object and resubmit; nothing from this request was applied")
    )]
    Rejected { reason: String },

    /// The request could not be decoded
    #[error("Malformed admission request: {reason}")]
    #[diagnostic(
        code(admission::malformed),
        help("The object must be a core/v1 Pod or Node in JSON form")
    )]
    Malformed { reason: String },

    /// A webhook or other collaborator did not answer
    #[error("Admission collaborator {collaborator} unavailable: {reason}")]
    #[diagnostic(
        code(admission::collaborator_unavailable),
        help("The configured failure policy decides whether the request is allowed")
    )]
    CollaboratorUnavailable {
        collaborator: String,
        reason: String,
    },
}

/// Result type alias for admission operations
pub type Result<T> = std::result::Result<T, AdmissionError>;

impl AdmissionError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub fn collaborator_unavailable(
        collaborator: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::CollaboratorUnavailable {
            collaborator: collaborator.into(),
            reason: reason.into(),
        }
    }
}

impl From<KestrelError> for AdmissionError {
    fn from(err: KestrelError) -> Self {
        match err {
            KestrelError::ValidationFailed { .. } | KestrelError::InvalidQuantity { .. } => {
                AdmissionError::rejected(err.to_string())
            }
            _ => AdmissionError::malformed(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AdmissionError {
    fn from(err: serde_json::Error) -> Self {
        AdmissionError::malformed(err.to_string())
    }
}
