//! Turning a pipeline outcome into an admission decision.
//!
//! Validating webhooks always allow. Mutating webhooks allow with a patch
//! when the scripts changed the object and deny only when the scripts could
//! not be run at all. Script failures never deny; they can be surfaced as
//! admission warnings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::patch::{self, PatchOperation, PatchStrategy};
use crate::pipeline::PipelineResult;

/// Which admission endpoint a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookMode {
    Mutating,
    Validating,
}

impl std::fmt::Display for WebhookMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebhookMode::Mutating => write!(f, "mutating"),
            WebhookMode::Validating => write!(f, "validating"),
        }
    }
}

impl std::str::FromStr for WebhookMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mutating" | "mutate" => Ok(WebhookMode::Mutating),
            "validating" | "validate" => Ok(WebhookMode::Validating),
            _ => anyhow::bail!(
                "Invalid webhook mode '{}'. Valid values: mutating, validating",
                s
            ),
        }
    }
}

/// What happened before the decision.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// No script was referenced or resolved; the pipeline never ran
    NoScripts,
    /// The pipeline ran to completion
    Completed(PipelineResult),
    /// Scripts could not be loaded, or the run was aborted
    Unavailable(String),
}

/// Deployment-level knobs for [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionPolicy {
    pub patch_strategy: PatchStrategy,
    /// Report failed scripts as admission warnings
    pub surface_warnings: bool,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            patch_strategy: PatchStrategy::Diff,
            surface_warnings: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub denial_reason: Option<String>,
    /// JSON Patch for the API server; only ever set in mutating mode
    pub change_description: Option<Vec<PatchOperation>>,
    pub warnings: Vec<String>,
}

impl AdmissionDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            denial_reason: None,
            change_description: None,
            warnings: Vec::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            denial_reason: Some(reason.into()),
            change_description: None,
            warnings: Vec::new(),
        }
    }

    fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Decide on a request given the pipeline outcome and the original object.
pub fn decide(
    mode: WebhookMode,
    outcome: &PipelineOutcome,
    original: &Value,
    policy: &DecisionPolicy,
) -> AdmissionDecision {
    match (mode, outcome) {
        (_, PipelineOutcome::NoScripts) => AdmissionDecision::allow(),

        (WebhookMode::Validating, PipelineOutcome::Unavailable(reason)) => {
            let mut warnings = Vec::new();
            if policy.surface_warnings {
                warnings.push(format!("luagate: scripts not run: {}", reason));
            }
            AdmissionDecision::allow().with_warnings(warnings)
        }

        (WebhookMode::Mutating, PipelineOutcome::Unavailable(reason)) => {
            AdmissionDecision::deny(format!("luagate: scripts could not be run: {}", reason))
        }

        (WebhookMode::Validating, PipelineOutcome::Completed(result)) => {
            AdmissionDecision::allow().with_warnings(script_warnings(result, policy))
        }

        (WebhookMode::Mutating, PipelineOutcome::Completed(result)) => {
            let ops = patch::generate(original, &result.document, policy.patch_strategy);
            let mut decision =
                AdmissionDecision::allow().with_warnings(script_warnings(result, policy));
            if !ops.is_empty() {
                decision.change_description = Some(ops);
            }
            decision
        }
    }
}

fn script_warnings(result: &PipelineResult, policy: &DecisionPolicy) -> Vec<String> {
    if !policy.surface_warnings {
        return Vec::new();
    }
    result
        .failures()
        .filter_map(|report| report.error())
        .map(|e| format!("luagate: {}", e))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ScriptError;
    use crate::pipeline::{StepReport, StepStatus};
    use serde_json::json;
    use std::time::Duration;

    fn original() -> Value {
        json!({"kind": "Pod", "metadata": {"name": "web", "labels": {}}})
    }

    fn completed(document: Value, failed: &[&str]) -> PipelineOutcome {
        let reports = failed
            .iter()
            .map(|name| StepReport {
                script: name.to_string(),
                status: StepStatus::Failed(ScriptError::Runtime {
                    script: name.to_string(),
                    message: "boom".to_string(),
                }),
                duration: Duration::from_millis(1),
            })
            .collect();
        PipelineOutcome::Completed(PipelineResult { document, reports })
    }

    #[test]
    fn test_no_scripts_allows_in_both_modes() {
        for mode in [WebhookMode::Mutating, WebhookMode::Validating] {
            let decision = decide(
                mode,
                &PipelineOutcome::NoScripts,
                &original(),
                &DecisionPolicy::default(),
            );
            assert_eq!(decision, AdmissionDecision::allow());
        }
    }

    #[test]
    fn test_validating_allows_even_when_every_script_fails() {
        let decision = decide(
            WebhookMode::Validating,
            &completed(original(), &["a", "b"]),
            &original(),
            &DecisionPolicy::default(),
        );
        assert!(decision.allowed);
        assert!(decision.change_description.is_none());
        assert_eq!(decision.warnings.len(), 2);
    }

    #[test]
    fn test_validating_never_patches() {
        let mut changed = original();
        changed["metadata"]["labels"]["x"] = json!("y");
        let decision = decide(
            WebhookMode::Validating,
            &completed(changed, &[]),
            &original(),
            &DecisionPolicy::default(),
        );
        assert!(decision.allowed);
        assert!(decision.change_description.is_none());
    }

    #[test]
    fn test_validating_allows_when_unavailable() {
        let decision = decide(
            WebhookMode::Validating,
            &PipelineOutcome::Unavailable("configmap missing".into()),
            &original(),
            &DecisionPolicy::default(),
        );
        assert!(decision.allowed);
        assert!(decision.warnings[0].contains("configmap missing"));
    }

    #[test]
    fn test_mutating_denies_when_unavailable() {
        let decision = decide(
            WebhookMode::Mutating,
            &PipelineOutcome::Unavailable("configmap missing".into()),
            &original(),
            &DecisionPolicy::default(),
        );
        assert!(!decision.allowed);
        assert!(decision.denial_reason.unwrap().contains("configmap missing"));
        assert!(decision.change_description.is_none());
    }

    #[test]
    fn test_mutating_unchanged_document_has_no_patch() {
        let decision = decide(
            WebhookMode::Mutating,
            &completed(original(), &[]),
            &original(),
            &DecisionPolicy::default(),
        );
        assert_eq!(decision, AdmissionDecision::allow());
    }

    #[test]
    fn test_mutating_change_produces_patch() {
        let mut changed = original();
        changed["metadata"]["labels"]["team"] = json!("core");
        let decision = decide(
            WebhookMode::Mutating,
            &completed(changed.clone(), &["b"]),
            &original(),
            &DecisionPolicy::default(),
        );
        assert!(decision.allowed);
        let ops = decision.change_description.unwrap();
        assert_eq!(patch::apply(&original(), &ops).unwrap(), changed);
        assert_eq!(decision.warnings.len(), 1);
        assert!(decision.warnings[0].contains("boom"));
    }

    #[test]
    fn test_warnings_can_be_disabled() {
        let policy = DecisionPolicy {
            surface_warnings: false,
            ..DecisionPolicy::default()
        };
        let decision = decide(
            WebhookMode::Mutating,
            &completed(original(), &["a"]),
            &original(),
            &policy,
        );
        assert!(decision.warnings.is_empty());
    }

    #[test]
    fn test_replace_strategy() {
        let mut changed = original();
        changed["metadata"]["name"] = json!("api");
        let policy = DecisionPolicy {
            patch_strategy: PatchStrategy::Replace,
            ..DecisionPolicy::default()
        };
        let decision = decide(
            WebhookMode::Mutating,
            &completed(changed.clone(), &[]),
            &original(),
            &policy,
        );
        let ops = decision.change_description.unwrap();
        assert_eq!(
            serde_json::to_value(&ops).unwrap(),
            json!([{"op": "replace", "path": "", "value": changed}])
        );
    }

    #[test]
    fn test_webhook_mode_from_str() {
        assert_eq!(
            "Mutating".parse::<WebhookMode>().unwrap(),
            WebhookMode::Mutating
        );
        assert_eq!(
            "validate".parse::<WebhookMode>().unwrap(),
            WebhookMode::Validating
        );
        assert!("audit".parse::<WebhookMode>().is_err());
    }
}
