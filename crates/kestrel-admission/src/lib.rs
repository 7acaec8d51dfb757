//! Kestrel Admission - validation and defaulting at the API boundary
//!
//! This crate provides:
//! - Structured admission requests and responses
//! - Atomic validation of pods and nodes
//! - Default node-condition tolerations as JSON patch operations
//! - Webhook calls governed by a failure policy

pub mod config;
pub mod controller;
pub mod defaults;
pub mod error;
pub mod policy;
pub mod request;
pub mod validation;

// Re-export commonly used types
pub use config::AdmissionConfig;
pub use controller::{AdmissionController, Webhook};
pub use defaults::default_tolerations_patch;
pub use error::{AdmissionError, Result};
pub use policy::FailurePolicy;
pub use request::{AdmissionRequest, AdmissionResponse, Operation};
pub use validation::{validate_request, AdmittedObject};
