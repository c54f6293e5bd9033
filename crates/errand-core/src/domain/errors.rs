//! Errors surfaced to callers of the engine.
//!
//! Step failures are not errors: handlers report them as `StepResult`
//! values and the engine turns them into retry/fallback decisions.

use thiserror::Error;

use super::ids::{StepId, StepType, TaskId};

/// Fatal, parse-time problems with a template. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("malformed template: {0}")]
    Malformed(String),

    #[error("template declares no steps")]
    EmptyTemplate,

    #[error("step '{step_id}' has unknown step type '{step_type}'")]
    UnknownStepType { step_id: StepId, step_type: StepType },

    #[error("step '{step_id}' is missing required parameter '{parameter}'")]
    MissingParameter { step_id: StepId, parameter: String },

    #[error("step '{step_id}' has an invalid parameter: {message}")]
    InvalidParameter { step_id: StepId, message: String },

    #[error("step id '{0}' is used more than once")]
    DuplicateStepId(StepId),

    #[error("step '{step_id}' has an invalid retry policy: {message}")]
    InvalidRetryPolicy { step_id: StepId, message: String },

    #[error("step '{step_id}' has an invalid timeout: {message}")]
    InvalidTimeout { step_id: StepId, message: String },

    #[error("fallback of step '{step_id}' nests deeper than the limit of {limit}")]
    FallbackDepthExceeded { step_id: StepId, limit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task '{0}' not found")]
    NotFound(TaskId),

    #[error("task '{0}' already exists")]
    AlreadyExists(TaskId),

    #[error("task '{0}' is still running and cannot be deleted")]
    NotTerminal(TaskId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("handler for step type '{0}' is already registered")]
    AlreadyRegistered(StepType),
}
