//! JSON response shapes and the error-to-status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::agent::TaskOutcome;
use crate::error::TaskError;

/// HTTP status for a task error.
///
/// Only caller mistakes are 4xx. Interpretation and execution failures are
/// 500; the error body's `retriable` flag tells transient ones apart.
pub fn status_for(error: &TaskError) -> StatusCode {
    match error {
        TaskError::MissingTask | TaskError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        TaskError::AccessDenied(_) | TaskError::UnauthorizedCapability(_) => StatusCode::FORBIDDEN,
        TaskError::NotFound(_) => StatusCode::NOT_FOUND,
        TaskError::MalformedStep(_)
        | TaskError::InvalidModelResponse(_)
        | TaskError::ModelUnavailable(_)
        | TaskError::ExecutionError { .. }
        | TaskError::HandlerTimeout { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub detail: String,
    pub retriable: bool,
}

impl From<&TaskError> for ErrorBody {
    fn from(error: &TaskError) -> Self {
        Self {
            kind: error.kind(),
            detail: error.to_string(),
            retriable: error.is_retriable(),
        }
    }
}

/// A request rejected before any task ran.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn bad_request(kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                kind,
                detail: detail.into(),
                retriable: false,
            },
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: ErrorBody {
                kind: "internal_error",
                detail: detail.into(),
                retriable: false,
            },
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(error: TaskError) -> Self {
        Self {
            status: status_for(&error),
            body: ErrorBody::from(&error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({"status": "failed", "error": self.body});
        (self.status, Json(body)).into_response()
    }
}

impl IntoResponse for TaskOutcome {
    fn into_response(self) -> Response {
        match self.failure {
            None => (
                StatusCode::OK,
                Json(json!({
                    "task_id": self.task_id.to_string(),
                    "status": "success",
                    "steps_executed": self.steps,
                })),
            )
                .into_response(),
            Some(failure) => (
                status_for(&failure.error),
                Json(json!({
                    "task_id": self.task_id.to_string(),
                    "status": "failed",
                    "error": ErrorBody::from(&failure.error),
                    "failed_at": failure.phase,
                    "steps_executed": self.steps,
                })),
            )
                .into_response(),
        }
    }
}
