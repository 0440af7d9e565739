//! Error taxonomy for task interpretation and execution.
//!
//! Component-level errors (`AccessDenied`, `UnknownCapability`,
//! `MalformedStep`) convert into [`TaskError`], which is what the HTTP
//! layer turns into a status code and a JSON error object.

use thiserror::Error;

use crate::agent::step::MalformedStep;
use crate::capabilities::builtin::process::CommandTimeout;
use crate::capabilities::registry::UnknownCapability;
use crate::sandbox::AccessDenied;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task description is required")]
    MissingTask,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    AccessDenied(#[from] AccessDenied),

    #[error("unauthorized function: {0}")]
    UnauthorizedCapability(String),

    #[error(transparent)]
    MalformedStep(#[from] MalformedStep),

    #[error("invalid LLM response: {0}")]
    InvalidModelResponse(String),

    #[error("LLM unavailable: {0}")]
    ModelUnavailable(String),

    #[error("execution error in {capability}: {detail}")]
    ExecutionError { capability: String, detail: String },

    #[error("{capability} timed out after {secs}s")]
    HandlerTimeout { capability: String, secs: u64 },

    #[error("file not found: {0}")]
    NotFound(String),
}

impl From<UnknownCapability> for TaskError {
    fn from(e: UnknownCapability) -> Self {
        TaskError::UnauthorizedCapability(e.0)
    }
}

impl TaskError {
    /// Stable machine-readable name, used in JSON error objects.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::MissingTask => "missing_task",
            TaskError::InvalidRequest(_) => "invalid_request",
            TaskError::AccessDenied(_) => "access_denied",
            TaskError::UnauthorizedCapability(_) => "unauthorized_capability",
            TaskError::MalformedStep(_) => "malformed_step",
            TaskError::InvalidModelResponse(_) => "invalid_model_response",
            TaskError::ModelUnavailable(_) => "model_unavailable",
            TaskError::ExecutionError { .. } => "execution_error",
            TaskError::HandlerTimeout { .. } => "handler_timeout",
            TaskError::NotFound(_) => "not_found",
        }
    }

    /// Whether resubmitting the same task may succeed.
    ///
    /// Nothing is retried automatically; this is only reported to the caller.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            TaskError::ModelUnavailable(_) | TaskError::HandlerTimeout { .. }
        )
    }

    /// Classifies a handler failure.
    ///
    /// Guard rejections and missing files keep their identity even when
    /// wrapped in context; anything else is an execution error.
    pub fn from_handler(capability: &str, err: anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(denied) = cause.downcast_ref::<AccessDenied>() {
                return TaskError::AccessDenied(denied.clone());
            }
            if let Some(timeout) = cause.downcast_ref::<CommandTimeout>() {
                return TaskError::HandlerTimeout {
                    capability: capability.to_string(),
                    secs: timeout.secs,
                };
            }
            if let Some(io) = cause.downcast_ref::<std::io::Error>() {
                if io.kind() == std::io::ErrorKind::NotFound {
                    return TaskError::NotFound(format!("{err:#}"));
                }
            }
        }
        TaskError::ExecutionError {
            capability: capability.to_string(),
            detail: format!("{err:#}"),
        }
    }
}
