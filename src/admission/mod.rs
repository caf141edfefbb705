//! Kubernetes admission: wire types, decisions and patches.

pub mod decision;
pub mod handler;
pub mod patch;
pub mod review;

pub use decision::{AdmissionDecision, DecisionPolicy, PipelineOutcome, WebhookMode, decide};
pub use handler::Admission;
pub use patch::{PatchOperation, PatchStrategy};
pub use review::{AdmissionRequest, AdmissionResponse, AdmissionReview};
