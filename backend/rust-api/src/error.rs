use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::live_quiz::{TransitionError, WindowError};

/// Error taxonomy of the live quiz service
#[derive(Debug, Error)]
pub enum LiveQuizError {
    #[error("Live quiz {0} not found")]
    NotFound(String),

    /// Command issued against a session in the wrong state
    #[error("{0}")]
    CommandRejected(String),

    #[error("Invalid live window: {0}")]
    InvalidWindow(#[from] WindowError),

    #[error("Quiz {0} has not started yet")]
    NotLive(String),

    #[error("Quiz {0} has already ended")]
    SessionClosed(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Answers for quiz {0} were already submitted")]
    AlreadySubmitted(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to parse JSON request body: {0}")]
    InvalidBody(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, LiveQuizError>;

impl LiveQuizError {
    pub fn validation(msg: impl Into<String>) -> Self {
        LiveQuizError::Validation(msg.into())
    }

    pub fn access_denied(msg: impl Into<String>) -> Self {
        LiveQuizError::AccessDenied(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LiveQuizError::NotFound(_) => StatusCode::NOT_FOUND,
            LiveQuizError::CommandRejected(_)
            | LiveQuizError::NotLive(_)
            | LiveQuizError::SessionClosed(_)
            | LiveQuizError::AlreadySubmitted(_) => StatusCode::CONFLICT,
            LiveQuizError::InvalidWindow(_)
            | LiveQuizError::Validation(_)
            | LiveQuizError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            LiveQuizError::AccessDenied(_) => StatusCode::FORBIDDEN,
            LiveQuizError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code clients branch on.
    pub fn code(&self) -> &'static str {
        match self {
            LiveQuizError::NotFound(_) => "not_found",
            LiveQuizError::CommandRejected(_) => "command_rejected",
            LiveQuizError::InvalidWindow(_) => "invalid_window",
            LiveQuizError::NotLive(_) => "quiz_not_started",
            LiveQuizError::SessionClosed(_) => "quiz_ended",
            LiveQuizError::AccessDenied(_) => "access_denied",
            LiveQuizError::AlreadySubmitted(_) => "already_submitted",
            LiveQuizError::Validation(_) => "validation_failed",
            LiveQuizError::InvalidBody(_) => "invalid_body",
            LiveQuizError::Internal(_) => "internal",
        }
    }
}

impl From<TransitionError> for LiveQuizError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Rejected { .. } => LiveQuizError::CommandRejected(err.to_string()),
            TransitionError::Window(window) => LiveQuizError::InvalidWindow(window),
        }
    }
}

impl From<validator::ValidationErrors> for LiveQuizError {
    fn from(err: validator::ValidationErrors) -> Self {
        LiveQuizError::Validation(err.to_string())
    }
}

impl IntoResponse for LiveQuizError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Live quiz request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "Live quiz request rejected");
        }
        let body = json!({
            "message": self.to_string(),
            "code": self.code(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ControlAction, QuizStatus};

    #[test]
    fn test_error_display() {
        let err = LiveQuizError::NotFound("quiz-1".to_string());
        assert_eq!(err.to_string(), "Live quiz quiz-1 not found");
    }

    #[test]
    fn test_rejected_transition_maps_to_conflict() {
        let err: LiveQuizError = TransitionError::Rejected {
            action: ControlAction::Start,
            status: QuizStatus::Completed,
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "command_rejected");
        assert_eq!(err.to_string(), "cannot start a quiz that is completed");
    }

    #[test]
    fn test_not_live_has_distinct_code() {
        let err = LiveQuizError::NotLive("quiz-1".to_string());
        assert_eq!(err.code(), "quiz_not_started");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_window_error_is_bad_request() {
        let err: LiveQuizError = TransitionError::Window(WindowError::EndNotAfterStart).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
