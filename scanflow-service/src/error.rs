// Service Errors
// Error taxonomy for the store, registry, run controller and step contract

use crate::models::RunStatus;

use std::io;
use thiserror::Error;
use uuid::Uuid;

/// Result alias used across the service crate
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors raised by the engine itself (configuration, lookups, state machine)
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown pipeline '{name}'. Available: {available}")]
    UnknownPipeline { name: String, available: String },

    #[error("pipeline '{0}' is already registered")]
    DuplicatePipeline(String),

    #[error("pipeline '{0}' is an add-on and cannot be the first pipeline run on a project")]
    AddonPipelineFirst(String),

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("project '{0}' already exists")]
    DuplicateProject(String),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("invalid run transition {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("run {0} cannot be resumed from status {1}")]
    RunNotResumable(Uuid, RunStatus),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Invariant violations raised by the resource graph store
///
/// These are recoverable at the step that caused them: a `DuplicatePath` means
/// "already present", a `ScopeViolation` means the step tried to reach into
/// another project.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("resource path '{path}' already exists in project {project}")]
    DuplicatePath { project: Uuid, path: String },

    #[error("scope violation: handle bound to project {bound} cannot access project {requested}")]
    ScopeViolation { bound: Uuid, requested: Uuid },

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("package not found: {0}")]
    PackageNotFound(Uuid),

    #[error("invalid package data: {0}")]
    InvalidPackage(String),

    #[error("dependency not found: {0}")]
    DependencyNotFound(String),
}

impl StoreError {
    pub fn is_duplicate_path(&self) -> bool {
        matches!(self, StoreError::DuplicatePath { .. })
    }
}

/// Error returned by a pipeline step
///
/// `Analysis` is a declared, expected domain failure (malformed input,
/// unsupported format). The controller records it and applies the
/// stop-on-failure policy. `Defect` covers everything unexpected (bugs,
/// outages, exhaustion) and always aborts the run.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{0}")]
    Analysis(String),

    #[error("{message}")]
    Defect {
        message: String,
        context: Vec<String>,
    },
}

impl StepError {
    pub fn analysis(message: impl Into<String>) -> Self {
        StepError::Analysis(message.into())
    }

    pub fn defect(message: impl Into<String>) -> Self {
        StepError::Defect {
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Attach a line of diagnostic context (only kept on defects)
    pub fn with_context(self, line: impl Into<String>) -> Self {
        match self {
            StepError::Defect {
                message,
                mut context,
            } => {
                context.push(line.into());
                StepError::Defect { message, context }
            }
            other => other,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, StepError::Analysis(_))
    }

    /// Full diagnostic text: the message followed by every context line
    pub fn diagnostics(&self) -> String {
        match self {
            StepError::Analysis(message) => message.clone(),
            StepError::Defect { message, context } => {
                let mut out = message.clone();
                for line in context {
                    out.push_str("\n  caused by: ");
                    out.push_str(line);
                }
                out
            }
        }
    }
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        StepError::defect(format!("unhandled store error: {}", err))
    }
}

impl From<io::Error> for StepError {
    fn from(err: io::Error) -> Self {
        StepError::defect(format!("IO error: {}", err)).with_context(format!("{:?}", err.kind()))
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        StepError::analysis(format!("invalid JSON: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defect_diagnostics_include_context() {
        let err = StepError::defect("index unavailable")
            .with_context("GET /api/packages")
            .with_context("connection refused");

        let text = err.diagnostics();
        assert!(text.starts_with("index unavailable"));
        assert!(text.contains("caused by: GET /api/packages"));
        assert!(text.contains("caused by: connection refused"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_analysis_ignores_context() {
        let err = StepError::analysis("manifest unparsable").with_context("ignored");
        assert!(err.is_recoverable());
        assert_eq!(err.diagnostics(), "manifest unparsable");
    }

    #[test]
    fn test_store_error_escaping_a_step_is_a_defect() {
        let err: StepError = StoreError::ResourceNotFound("a/b".to_string()).into();
        assert!(!err.is_recoverable());
    }
}
