//! Sequential script orchestration.
//!
//! Scripts run one at a time in lexicographic name order. Each successful
//! script hands its output to the next one; a failed script is recorded and
//! skipped, and the next script receives the last good document. Only
//! cancellation or a broken sandbox aborts a run.

pub mod observer;

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::{PipelineError, ScriptError};
use crate::sandbox::{SandboxExecutor, Script};
use observer::Observer;

/// Scripts keyed, and therefore ordered, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptSet {
    scripts: BTreeMap<String, Script>,
}

impl ScriptSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script, replacing any script with the same name.
    pub fn insert(&mut self, script: Script) -> Option<Script> {
        self.scripts.insert(script.name.clone(), script)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Scripts in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Script> {
        self.scripts.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.scripts.keys().map(String::as_str).collect()
    }
}

impl FromIterator<Script> for ScriptSet {
    fn from_iter<I: IntoIterator<Item = Script>>(iter: I) -> Self {
        let mut set = ScriptSet::new();
        for script in iter {
            set.insert(script);
        }
        set
    }
}

/// What happened to one script in a run.
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Succeeded,
    Failed(ScriptError),
}

/// Per-script entry of a [`PipelineResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub script: String,
    pub status: StepStatus,
    pub duration: Duration,
}

impl StepReport {
    pub fn error(&self) -> Option<&ScriptError> {
        match &self.status {
            StepStatus::Succeeded => None,
            StepStatus::Failed(e) => Some(e),
        }
    }
}

/// Final document of a run plus one report per script, in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    pub document: Value,
    pub reports: Vec<StepReport>,
}

impl PipelineResult {
    /// Reports of the scripts that failed.
    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.reports.iter().filter(|r| r.error().is_some())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}

/// Runs a [`ScriptSet`] through the sandbox.
#[derive(Clone, Default)]
pub struct Orchestrator {
    executor: SandboxExecutor,
    observer: Option<Arc<dyn Observer>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("executor", &self.executor)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl Orchestrator {
    pub fn new(executor: SandboxExecutor) -> Self {
        Self {
            executor,
            observer: None,
        }
    }

    /// Attach an observer notified with the starting document of every run.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run every script in `scripts` against `initial`.
    pub fn run(
        &self,
        scripts: &ScriptSet,
        initial: Value,
        cancel: &CancellationToken,
    ) -> Result<PipelineResult, PipelineError> {
        if let Some(observer) = &self.observer
            && let Err(e) = observer.observe(&initial)
        {
            tracing::warn!(error = %e, "Observer failed, continuing");
        }

        let mut document = initial;
        let mut reports = Vec::with_capacity(scripts.len());

        for script in scripts.iter() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled {
                    next_script: script.name.clone(),
                });
            }

            let outcome = self
                .executor
                .execute_with_cancel(script, &document, cancel);
            let status = match outcome.result {
                Ok(next) => {
                    document = next;
                    StepStatus::Succeeded
                }
                Err(ScriptError::Cancelled { script }) => {
                    return Err(PipelineError::Cancelled {
                        next_script: script,
                    });
                }
                Err(e) if e.is_fatal() => return Err(PipelineError::Aborted(e)),
                Err(e) => StepStatus::Failed(e),
            };

            reports.push(StepReport {
                script: outcome.script,
                status,
                duration: outcome.duration,
            });
        }

        let result = PipelineResult { document, reports };
        tracing::debug!(
            scripts = result.reports.len(),
            failed = result.failure_count(),
            "Pipeline finished"
        );
        Ok(result)
    }
}
