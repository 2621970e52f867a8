//! Engine Error Taxonomy
//!
//! The closed failure taxonomy surfaced by the service facade. Per-rule
//! evaluation errors never reach this level: they are recovered locally as
//! no-match with a warning. Everything else a caller could not have
//! anticipated is surfaced, tagged with a stable kind string that the
//! execution log and the transport layer both use.

use crate::abtest::AbTestError;
use crate::dmn::DmnError;
use crate::evaluator::CompileError;
use crate::executor::BatchError;
use crate::pipeline::PipelineError;
use crate::registry::RegistryError;
use crate::repository::RepositoryError;
use crate::workflow::WorkflowError;
use thiserror::Error;

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input record or request
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Rule failed compilation
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Ruleset failed validation (duplicate ids, bad pattern keys)
    #[error("validation failed: {0}")]
    Validation(String),

    /// DMN document failed to parse or compile
    #[error(transparent)]
    Dmn(DmnError),

    /// Workflow failure
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Repository / storage failure
    #[error(transparent)]
    Storage(RepositoryError),

    /// A/B engine failure
    #[error(transparent)]
    AbTest(#[from] AbTestError),

    /// Requested entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Write conflicts with existing state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Caller cancelled the request
    #[error("execution cancelled")]
    Cancelled,

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias for the service facade.
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Stable kind string used in execution logs, batch failure payloads
    /// and transport mappings.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "InputValidationError",
            EngineError::Compile(_) | EngineError::Validation(_) => "RuleCompileError",
            EngineError::Dmn(DmnError::Cancelled) => "CancelledError",
            EngineError::Dmn(_) => "DMNParseError",
            EngineError::Workflow(WorkflowError::UnknownStage(_)) => "WorkflowStageUnknown",
            EngineError::Workflow(_) => "WorkflowStageFailed",
            EngineError::Storage(_) => "StorageError",
            EngineError::AbTest(AbTestError::NotFound(_)) | EngineError::NotFound(_) => {
                "NotFoundError"
            }
            EngineError::AbTest(AbTestError::Repository(_)) => "StorageError",
            EngineError::AbTest(_) => "InputValidationError",
            EngineError::Conflict(_) => "ConflictError",
            EngineError::Cancelled => "CancelledError",
            EngineError::Internal(_) => "InternalError",
        }
    }
}

impl From<PipelineError> for EngineError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Cancelled => EngineError::Cancelled,
            PipelineError::Compile(inner) => EngineError::Compile(inner),
            other => EngineError::Validation(other.to_string()),
        }
    }
}

impl From<DmnError> for EngineError {
    fn from(e: DmnError) -> Self {
        match e {
            DmnError::Cancelled => EngineError::Cancelled,
            other => EngineError::Dmn(other),
        }
    }
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(what) => EngineError::NotFound(what),
            RepositoryError::Conflict(what) => EngineError::Conflict(what),
            other => EngineError::Storage(other),
        }
    }
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::DuplicateRule(id) => {
                EngineError::Conflict(format!("rule '{}' already exists", id))
            }
            RegistryError::UnknownRule(id) => {
                EngineError::NotFound(format!("rule '{}'", id))
            }
            RegistryError::Validation(inner) => inner.into(),
            RegistryError::Repository(inner) => inner.into(),
        }
    }
}

impl From<BatchError> for EngineError {
    fn from(e: BatchError) -> Self {
        match e {
            BatchError::EmptyInput => EngineError::InvalidInput(e.to_string()),
            BatchError::Pool(message) => EngineError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(
            EngineError::InvalidInput("x".into()).kind(),
            "InputValidationError"
        );
        assert_eq!(EngineError::Cancelled.kind(), "CancelledError");
        assert_eq!(
            EngineError::Workflow(WorkflowError::UnknownStage("s".into())).kind(),
            "WorkflowStageUnknown"
        );
        assert_eq!(
            EngineError::Dmn(DmnError::Empty).kind(),
            "DMNParseError"
        );
    }

    #[test]
    fn test_pipeline_cancellation_maps_to_cancelled() {
        let err: EngineError = PipelineError::Cancelled.into();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn test_batch_empty_input_maps_to_invalid_input() {
        let err: EngineError = BatchError::EmptyInput.into();
        assert_eq!(err.kind(), "InputValidationError");
    }
}
