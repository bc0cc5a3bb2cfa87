//! Top-level HTTP error type. Every handler returns `ApiResult<T>`; this
//! type maps application failures onto an HTTP status code and a small
//! JSON body `{error, request_id}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn validation_error(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    fn status_and_category(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            Self::ValidationError(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "resource"),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    category: &'static str,
    request_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, category) = self.status_and_category();
        let request_id = Uuid::new_v4().to_string();
        tracing::error!(%request_id, %category, error = %self, "request failed");
        let body = ErrorBody { error: self.to_string(), category, request_id };
        (status, Json(body)).into_response()
    }
}

impl From<crate::services::OrchestratorError> for ApiError {
    fn from(err: crate::services::OrchestratorError) -> Self {
        match err.category() {
            "resource" => Self::service_unavailable(err.to_string()),
            "authorization" => Self::forbidden(err.to_string()),
            "user_input" => Self::invalid_input(err.to_string()),
            // "semantic": the model misbehaved, not the caller.
            _ => Self::internal_error(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
