//! Typed error hierarchy for luagate.
//!
//! The enums follow the request path from the outside in:
//! - `ReferenceError`: a malformed entry in the scripts annotation (skipped)
//! - `SourceError`: the script source could not resolve a reference (fatal)
//! - `ScriptError`: one script failed inside the sandbox (contained)
//! - `PipelineError`: the orchestrator had to abort the whole run
//! - `AdmissionError`: the admission request itself is unusable

use thiserror::Error;

/// A script reference that does not have the `<namespace>/<name>` shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("Invalid script reference '{0}': expected <namespace>/<name>")]
    Malformed(String),
}

/// Errors from a script source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Script source unavailable for {reference}: {message}")]
    Unavailable { reference: String, message: String },
}

/// Failure of a single script invocation.
///
/// The first three variants are ordinary, script-level failures that the
/// orchestrator absorbs. `Sandbox` and `Cancelled` are fatal for the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("Script {script} failed to parse: {message}")]
    Syntax { script: String, message: String },

    #[error("Script {script} raised an error: {message}")]
    Runtime { script: String, message: String },

    #[error("Script {script} document translation failed: {message}")]
    Translation { script: String, message: String },

    #[error("Sandbox setup failed for script {script}: {message}")]
    Sandbox { script: String, message: String },

    #[error("Script {script} was cancelled")]
    Cancelled { script: String },
}

impl ScriptError {
    /// Name of the script this error belongs to.
    pub fn script(&self) -> &str {
        match self {
            ScriptError::Syntax { script, .. }
            | ScriptError::Runtime { script, .. }
            | ScriptError::Translation { script, .. }
            | ScriptError::Sandbox { script, .. }
            | ScriptError::Cancelled { script } => script,
        }
    }

    /// Whether this failure must abort the remaining pipeline.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScriptError::Sandbox { .. } | ScriptError::Cancelled { .. }
        )
    }

    /// Short machine-friendly label, used in logs and warnings.
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptError::Syntax { .. } => "syntax",
            ScriptError::Runtime { .. } => "runtime",
            ScriptError::Translation { .. } => "translation",
            ScriptError::Sandbox { .. } => "sandbox",
            ScriptError::Cancelled { .. } => "cancelled",
        }
    }
}

/// Unrecoverable orchestrator faults.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline cancelled before script {next_script}")]
    Cancelled { next_script: String },

    #[error("Pipeline aborted: {0}")]
    Aborted(#[source] ScriptError),

    #[error("Pipeline worker failed: {0}")]
    Worker(String),
}

/// Errors about the admission request itself.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("Failed to decode admission review: {0}")]
    MalformedBody(#[source] serde_json::Error),

    #[error("Admission review has no request")]
    MissingRequest,

    #[error("Failed to parse object metadata: {0}")]
    DocumentEncoding(String),
}
