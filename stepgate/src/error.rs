//! Typed errors surfaced by the orchestrator.
//!
//! Precondition failures (wrong job status, missing planning artifacts,
//! rejected evidence) are structured results, not errors. These variants
//! cover the cases a caller cannot recover from by retrying the same call.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("step not found: {job_id}/{step_id}")]
    StepNotFound { job_id: String, step_id: String },

    #[error("stale step: submitted {submitted}, current step is {expected}")]
    StaleStep { expected: String, submitted: String },

    #[error("invalid plan:\n- {}", .0.join("\n- "))]
    InvalidPlan(Vec<String>),

    #[error("invalid planning update: {0}")]
    InvalidUpdate(String),

    #[error("storage error")]
    Storage(#[source] anyhow::Error),

    #[error("prompt rendering failed")]
    Prompt(#[source] anyhow::Error),
}

impl OrchestratorError {
    /// True for errors caused by the request rather than the environment.
    pub fn is_caller_error(&self) -> bool {
        !matches!(
            self,
            OrchestratorError::Storage(_) | OrchestratorError::Prompt(_)
        )
    }
}

pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
