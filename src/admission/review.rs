//! `admission.k8s.io/v1` AdmissionReview wire types.
//!
//! Only the fields luagate reads or writes are modelled; unknown request
//! fields are ignored on input.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::decision::AdmissionDecision;

pub const API_VERSION: &str = "admission.k8s.io/v1";
pub const KIND: &str = "AdmissionReview";
pub const PATCH_TYPE_JSON_PATCH: &str = "JSONPatch";

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<GroupVersionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

impl AdmissionRequest {
    /// `<namespace>/<name>` or whichever part is known, for logs.
    pub fn describe(&self) -> String {
        let kind = self.kind.as_ref().map(|k| k.kind.as_str()).unwrap_or("?");
        match (&self.namespace, &self.name) {
            (Some(ns), Some(name)) => format!("{} {}/{}", kind, ns, name),
            (None, Some(name)) => format!("{} {}", kind, name),
            _ => kind.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
    /// Base64-encoded JSON Patch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AdmissionResponse {
    /// Encode a decision for the request with `uid`.
    ///
    /// Denials carry `status.code` (403 unless `code` says otherwise) and the
    /// reason as `status.message`.
    pub fn from_decision(uid: &str, decision: &AdmissionDecision, code: Option<u16>) -> Self {
        let status = decision.denial_reason.as_ref().map(|reason| Status {
            code: Some(code.unwrap_or(403)),
            message: reason.clone(),
        });

        let patch = decision
            .change_description
            .as_ref()
            .filter(|ops| !ops.is_empty())
            .and_then(|ops| serde_json::to_vec(ops).ok())
            .map(|bytes| STANDARD.encode(bytes));

        Self {
            uid: uid.to_string(),
            allowed: decision.allowed,
            status,
            patch_type: patch.as_ref().map(|_| PATCH_TYPE_JSON_PATCH.to_string()),
            patch,
            warnings: decision.warnings.clone(),
        }
    }
}

impl AdmissionReview {
    /// Wrap a response in a review envelope echoing the request's version.
    pub fn with_response(api_version: &str, response: AdmissionResponse) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: KIND.to_string(),
            request: None,
            response: Some(response),
        }
    }
}
