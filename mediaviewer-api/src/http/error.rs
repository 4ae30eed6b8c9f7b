//! HTTP error handling
//!
//! Handlers return [`AppError`]; each variant maps onto one status code and
//! renders as `{error, status}` JSON. Internal failure detail is logged at
//! response time and never echoed to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(detail) => {
                tracing::error!("{detail}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

/// Convert `mediaviewer_core` errors to HTTP errors
impl From<mediaviewer_core::Error> for AppError {
    fn from(err: mediaviewer_core::Error) -> Self {
        use mediaviewer_core::Error;

        match err {
            Error::NotFound(msg) => Self::NotFound(msg),
            Error::InvalidInput(msg) => Self::BadRequest(msg),
            Error::Busy(msg) => Self::Conflict(msg),
            Error::External(msg) => Self::Internal(format!("external tool: {msg}")),
            Error::Database(e) => Self::Internal(format!("database: {e}")),
            Error::Serialization(e) => Self::Internal(format!("serialization: {e}")),
            Error::Io(e) => Self::Internal(format!("i/o: {e}")),
            Error::Internal(msg) => Self::Internal(msg),
        }
    }
}

/// Convert axum/http response-build errors to HTTP errors
impl From<axum::http::Error> for AppError {
    fn from(err: axum::http::Error) -> Self {
        Self::Internal(format!("response build: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::internal_server_error("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_core_error_mapping() {
        let err: AppError = mediaviewer_core::Error::Busy("scan running".to_string()).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err: AppError = mediaviewer_core::Error::NotFound("m1".to_string()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "m1");

        let err: AppError =
            mediaviewer_core::Error::InvalidInput("mediaId must be non-empty".to_string()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: AppError = mediaviewer_core::Error::External("ffprobe died".to_string()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
