//! Request-level admission flow: read the annotation, load the scripts, run
//! the pipeline on a blocking thread and encode the decision.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::decision::{AdmissionDecision, DecisionPolicy, PipelineOutcome, WebhookMode, decide};
use super::review::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use crate::errors::{AdmissionError, PipelineError};
use crate::pipeline::Orchestrator;
use crate::scripts::{ScriptLoader, annotation_value, parse_references};

/// Everything needed to answer admission reviews.
#[derive(Clone)]
pub struct Admission {
    loader: ScriptLoader,
    orchestrator: Orchestrator,
    annotation: String,
    policy: DecisionPolicy,
}

impl Admission {
    pub fn new(
        loader: ScriptLoader,
        orchestrator: Orchestrator,
        annotation: impl Into<String>,
        policy: DecisionPolicy,
    ) -> Self {
        Self {
            loader,
            orchestrator,
            annotation: annotation.into(),
            policy,
        }
    }

    /// Decode a raw request body and review it.
    pub async fn review_bytes(
        &self,
        mode: WebhookMode,
        body: &[u8],
    ) -> Result<AdmissionReview, AdmissionError> {
        let review: AdmissionReview =
            serde_json::from_slice(body).map_err(AdmissionError::MalformedBody)?;
        self.review(mode, review).await
    }

    /// Answer one AdmissionReview.
    ///
    /// Only a review without a `request` is an error; everything else,
    /// including unparseable object metadata, becomes a response.
    pub async fn review(
        &self,
        mode: WebhookMode,
        review: AdmissionReview,
    ) -> Result<AdmissionReview, AdmissionError> {
        let request = review.request.ok_or(AdmissionError::MissingRequest)?;

        let (decision, code) = match self.evaluate(mode, &request).await {
            Ok(decision) => (decision, None),
            Err(e @ AdmissionError::DocumentEncoding(_)) => {
                tracing::warn!(uid = %request.uid, %mode, error = %e, "Rejecting unreadable object");
                (AdmissionDecision::deny(e.to_string()), Some(400))
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            uid = %request.uid,
            %mode,
            object = %request.describe(),
            allowed = decision.allowed,
            patched = decision.change_description.is_some(),
            warnings = decision.warnings.len(),
            "Admission decision"
        );

        Ok(AdmissionReview::with_response(
            &review.api_version,
            AdmissionResponse::from_decision(&request.uid, &decision, code),
        ))
    }

    async fn evaluate(
        &self,
        mode: WebhookMode,
        request: &AdmissionRequest,
    ) -> Result<AdmissionDecision, AdmissionError> {
        let object = match &request.object {
            None | Some(Value::Null) => return Ok(AdmissionDecision::allow()),
            Some(object) => object,
        };

        let annotation =
            annotation_value(object, &self.annotation).map_err(AdmissionError::DocumentEncoding)?;
        let outcome = match annotation {
            Some(value) => self.run_scripts(value, object).await,
            None => PipelineOutcome::NoScripts,
        };

        Ok(decide(mode, &outcome, object, &self.policy))
    }

    async fn run_scripts(&self, annotation: &str, object: &Value) -> PipelineOutcome {
        let references = parse_references(annotation);
        if references.valid.is_empty() {
            return PipelineOutcome::NoScripts;
        }

        let scripts = match self.loader.load(&references.valid).await {
            Ok(scripts) if scripts.is_empty() => return PipelineOutcome::NoScripts,
            Ok(scripts) => scripts,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load scripts");
                return PipelineOutcome::Unavailable(e.to_string());
            }
        };

        // Dropping this future (client gone, request timeout) cancels the run.
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let orchestrator = self.orchestrator.clone();
        let initial = object.clone();
        let joined =
            tokio::task::spawn_blocking(move || orchestrator.run(&scripts, initial, &cancel)).await;
        guard.disarm();

        match joined {
            Ok(Ok(result)) => PipelineOutcome::Completed(result),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Pipeline aborted");
                PipelineOutcome::Unavailable(e.to_string())
            }
            Err(e) => {
                let e = PipelineError::Worker(e.to_string());
                tracing::error!(error = %e, "Pipeline worker failed");
                PipelineOutcome::Unavailable(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::patch;
    use crate::admission::patch::PatchOperation;
    use crate::sandbox::{SandboxExecutor, SandboxSettings};
    use crate::scripts::MemorySource;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const ANNOTATION: &str = "luagate.io/scripts";

    fn admission() -> Admission {
        admission_with(Orchestrator::default())
    }

    fn admission_with(orchestrator: Orchestrator) -> Admission {
        let source = MemorySource::new()
            .with_script(
                "default/team-label",
                r#"object.metadata.labels = object.metadata.labels or {}
object.metadata.labels.team = "core""#,
            )
            .with_script("default/broken", "error('broken on purpose')")
            .with_script("default/noop", "local _ = object.kind")
            .with_script("default/spin", "while true do end");
        Admission::new(
            ScriptLoader::new(Arc::new(source)),
            orchestrator,
            ANNOTATION,
            DecisionPolicy::default(),
        )
    }

    fn pod(scripts: Option<&str>) -> Value {
        let mut pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "web", "namespace": "default", "labels": {"app": "web"}},
            "spec": {"containers": [{"name": "app", "image": "nginx"}]}
        });
        if let Some(scripts) = scripts {
            pod["metadata"]["annotations"] = json!({ ANNOTATION: scripts });
        }
        pod
    }

    fn review_for(object: Value) -> AdmissionReview {
        serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {"uid": "abc-123", "operation": "CREATE", "object": object}
        }))
        .unwrap()
    }

    async fn respond(mode: WebhookMode, object: Value) -> AdmissionResponse {
        admission()
            .review(mode, review_for(object))
            .await
            .unwrap()
            .response
            .unwrap()
    }

    fn decode_patch(response: &AdmissionResponse) -> Vec<PatchOperation> {
        let bytes = STANDARD.decode(response.patch.as_ref().unwrap()).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_mutating_patch() {
        let object = pod(Some("default/team-label, default/broken"));
        let response = respond(WebhookMode::Mutating, object.clone()).await;

        assert_eq!(response.uid, "abc-123");
        assert!(response.allowed);
        assert_eq!(response.patch_type.as_deref(), Some("JSONPatch"));
        let patched = patch::apply(&object, &decode_patch(&response)).unwrap();
        assert_eq!(patched["metadata"]["labels"]["team"], "core");
        assert_eq!(patched["metadata"]["labels"]["app"], "web");
        assert_eq!(response.warnings.len(), 1);
        assert!(response.warnings[0].contains("default/broken"));
    }

    #[tokio::test]
    async fn test_mutating_without_change() {
        let response = respond(WebhookMode::Mutating, pod(Some("default/noop"))).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
        assert!(response.patch_type.is_none());
    }

    #[tokio::test]
    async fn test_validating_never_patches() {
        let response = respond(WebhookMode::Validating, pod(Some("default/team-label"))).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_reference() {
        let object = pod(Some("default/team-label,default/missing"));

        let mutating = respond(WebhookMode::Mutating, object.clone()).await;
        assert!(!mutating.allowed);
        assert!(mutating.patch.is_none());
        let status = mutating.status.unwrap();
        assert_eq!(status.code, Some(403));
        assert!(status.message.contains("default/missing"));

        let validating = respond(WebhookMode::Validating, object).await;
        assert!(validating.allowed);
    }

    #[tokio::test]
    async fn test_no_annotation_allows() {
        let response = respond(WebhookMode::Mutating, pod(None)).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
        assert!(response.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_only_malformed_references_allows() {
        let response = respond(WebhookMode::Mutating, pod(Some("nonsense, , a/b/c"))).await;
        assert!(response.allowed);
        assert!(response.patch.is_none());
    }

    #[tokio::test]
    async fn test_unreadable_metadata_is_denied_in_both_modes() {
        let object = json!({"kind": "Pod", "metadata": {"annotations": "not-a-map"}});
        for mode in [WebhookMode::Mutating, WebhookMode::Validating] {
            let response = respond(mode, object.clone()).await;
            assert!(!response.allowed);
            assert_eq!(response.status.unwrap().code, Some(400));
        }
    }

    #[tokio::test]
    async fn test_missing_object_allows() {
        let review: AdmissionReview = serde_json::from_value(json!({
            "request": {"uid": "del-1", "operation": "DELETE", "object": null}
        }))
        .unwrap();
        let response = admission()
            .review(WebhookMode::Mutating, review)
            .await
            .unwrap()
            .response
            .unwrap();
        assert!(response.allowed);
        assert_eq!(response.uid, "del-1");
    }

    #[tokio::test]
    async fn test_missing_request_is_an_error() {
        let err = admission()
            .review_bytes(WebhookMode::Mutating, br#"{"kind": "AdmissionReview"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::MissingRequest));
    }

    #[tokio::test]
    async fn test_malformed_body_is_an_error() {
        let err = admission()
            .review_bytes(WebhookMode::Validating, b"{not json")
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::MalformedBody(_)));
    }

    #[tokio::test]
    async fn test_aborted_pipeline_denies_mutating_and_warns_validating() {
        let starved = || {
            admission_with(Orchestrator::new(SandboxExecutor::new(SandboxSettings {
                memory_limit: Some(1),
                ..SandboxSettings::default()
            })))
        };
        let object = pod(Some("default/team-label"));

        let mutating = starved()
            .review(WebhookMode::Mutating, review_for(object.clone()))
            .await
            .unwrap()
            .response
            .unwrap();
        assert!(!mutating.allowed);
        assert!(mutating.patch.is_none());
        let message = mutating.status.unwrap().message;
        assert!(message.contains("could not be run"));
        assert!(message.contains("Sandbox setup failed"));

        let validating = starved()
            .review(WebhookMode::Validating, review_for(object))
            .await
            .unwrap()
            .response
            .unwrap();
        assert!(validating.allowed);
        assert_eq!(validating.warnings.len(), 1);
        assert!(validating.warnings[0].contains("scripts not run"));
    }

    #[test]
    fn test_dropped_review_cancels_running_script() {
        // One blocking thread: a script left spinning would starve the next review.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(1)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let admission = admission();

            let spinning = tokio::time::timeout(
                Duration::from_millis(200),
                admission.review(WebhookMode::Mutating, review_for(pod(Some("default/spin")))),
            )
            .await;
            assert!(spinning.is_err());

            let next = tokio::time::timeout(
                Duration::from_secs(10),
                admission.review(
                    WebhookMode::Mutating,
                    review_for(pod(Some("default/team-label"))),
                ),
            )
            .await
            .expect("blocking thread was not released")
            .unwrap()
            .response
            .unwrap();
            assert!(next.allowed);
            assert!(next.patch.is_some());
        });
    }
}
