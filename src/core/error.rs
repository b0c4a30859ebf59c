use crate::core::generator::GenerationError;
use crate::core::patch::PatchError;
use crate::core::tree::ValidationReport;

/// The closed set of ways a run can fail. Every step converts its own
/// failures into one of these before reporting; nothing downstream guesses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("ValidationError: {0}")]
    Validation(String),
    #[error("GenerationError: {0}")]
    Generation(String),
    #[error("PersistenceError: {0}")]
    Persistence(String),
    #[error("ConcurrencyError: project '{0}' already has a run in progress")]
    Concurrency(String),
    #[error("Cancelled: run was cancelled")]
    Cancelled,
}

impl RunError {
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Validation(_) => "ValidationError",
            RunError::Generation(_) => "GenerationError",
            RunError::Persistence(_) => "PersistenceError",
            RunError::Concurrency(_) => "ConcurrencyError",
            RunError::Cancelled => "Cancelled",
        }
    }

    pub fn persistence(err: anyhow::Error) -> Self {
        RunError::Persistence(format!("{:#}", err))
    }
}

impl From<PatchError> for RunError {
    fn from(err: PatchError) -> Self {
        RunError::Validation(err.to_string())
    }
}

impl From<ValidationReport> for RunError {
    fn from(report: ValidationReport) -> Self {
        RunError::Validation(report.to_string())
    }
}

impl From<GenerationError> for RunError {
    fn from(err: GenerationError) -> Self {
        RunError::Generation(err.to_string())
    }
}
