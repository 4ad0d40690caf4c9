//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parleql_error::EngineError;
use serde::Serialize;

/// Error envelope returned to clients. Messages are sanitized: internal
/// failures never leak their original text.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal,
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::NotFound { what } => Self::NotFound(what),
            EngineError::Configuration { message } | EngineError::ConfigFile { message } => {
                Self::BadRequest(message)
            },
            other => {
                tracing::error!(error = %other, "request failed");
                Self::Internal
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(what) => (StatusCode::NOT_FOUND, format!("not found: {what}")),
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("internal server error"),
            ),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
