//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use collab_common::SessionError;
use serde_json::json;

pub const SESSION_NOT_FOUND: &str = "Session not found";
pub const CREATE_FAILED: &str = "Failed to create session. Check the repo URL and try again.";

/// Every failure an API handler can return; rendered as `{"error": ...}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Conflict(String),
    RateLimited(String),
    Internal(String),
}

impl ApiError {
    /// Creation failures collapse to one generic message except capacity,
    /// which tells the caller to come back later.
    pub fn from_create(err: SessionError) -> Self {
        match err {
            SessionError::Capacity { .. } => Self::RateLimited(err.to_string()),
            other => {
                tracing::warn!(error = %other, "session creation failed");
                Self::BadRequest(CREATE_FAILED.into())
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::NotFound => SESSION_NOT_FOUND,
            Self::BadRequest(m) | Self::Conflict(m) | Self::RateLimited(m) | Self::Internal(m) => m,
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => Self::NotFound,
            SessionError::Ended(_) => Self::Conflict(err.to_string()),
            SessionError::Capacity { .. } => Self::RateLimited(err.to_string()),
            SessionError::InvalidRepo(_) | SessionError::Acquisition(_) => {
                Self::BadRequest(err.to_string())
            }
            SessionError::Spawn(_) | SessionError::Io(_) => Self::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_common::TerminalError;

    #[test]
    fn create_failures_are_generic() {
        let err = ApiError::from_create(SessionError::InvalidRepo("x".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), CREATE_FAILED);

        let err = ApiError::from_create(SessionError::Acquisition("clone failed".into()));
        assert_eq!(err.message(), CREATE_FAILED);
    }

    #[test]
    fn capacity_is_429() {
        let err = ApiError::from_create(SessionError::Capacity { max: 2 });
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.message(), "maximum sessions (2) reached");
    }

    #[test]
    fn lifecycle_errors_map_to_status() {
        assert_eq!(
            ApiError::from(SessionError::NotFound("a".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(SessionError::Ended("a".into())).status(),
            StatusCode::CONFLICT
        );
        let spawn = SessionError::Spawn(TerminalError::SpawnFailed("gone".into()));
        assert_eq!(ApiError::from(spawn).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
