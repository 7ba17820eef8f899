use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::engine::models::SubmissionStatus;

/// Errors surfaced to HTTP callers. Execution failures never end up here;
/// they become terminal submission states instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(u32),
    #[error("queue is full")]
    QueueFull,
    #[error("submission not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match self {
            EngineError::InvalidRequest(_) | EngineError::UnsupportedLanguage(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::NotFound => StatusCode::NOT_FOUND,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(_) => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Failures of the sandbox or a language plugin that prevent a verdict from
/// being computed normally.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(u32),
    #[error("sandbox error: {0}")]
    Sandbox(String),
    #[error("required tool `{0}` is not installed on this host")]
    ToolingMissing(String),
    #[error("resource limit unsupported on this platform: {0}")]
    LimitUnsupported(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("submission {0} not found")]
    NotFound(Uuid),
    #[error("submission {0} already exists")]
    Duplicate(Uuid),
    #[error("submission {id} is {actual}, expected {expected}")]
    StatusConflict {
        id: Uuid,
        expected: SubmissionStatus,
        actual: SubmissionStatus,
    },
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("language id {id} is already bound to {existing}")]
    DuplicateId { id: u32, existing: String },
}
