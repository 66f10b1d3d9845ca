use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use super::guest::GuestValidationError;
use crate::models::live_quiz::WindowError;
use crate::models::ControlAction;
use crate::utils::time::TimeInputError;

const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// Failures surfaced to client code. Server messages are carried verbatim.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("{0}")]
    CommandRejected(String),

    #[error("{0}")]
    NotLive(String),

    #[error("{0}")]
    AccessDenied(String),

    /// Network-level failure; the caller may retry.
    #[error("Network error: {0}")]
    Transport(String),

    #[error(transparent)]
    GuestValidation(#[from] GuestValidationError),

    #[error(transparent)]
    InvalidWindow(#[from] WindowError),

    #[error(transparent)]
    InvalidTime(#[from] TimeInputError),

    #[error("{0} is already in progress")]
    InFlight(ControlAction),

    #[error("{0}")]
    AlreadySubmitted(String),

    #[error("{0}")]
    SessionEnded(String),

    #[error("{message}")]
    Server { status: u16, message: String },
}

/// Error body every server endpoint returns.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ClientError {
    /// Classifies a non-2xx response by its `code`, falling back to the status.
    pub fn from_response(status: StatusCode, body: ErrorBody) -> Self {
        let message = body
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| GENERIC_FAILURE.to_string());

        match body.code.as_deref() {
            Some("command_rejected") => ClientError::CommandRejected(message),
            Some("quiz_not_started") => ClientError::NotLive(message),
            Some("access_denied") => ClientError::AccessDenied(message),
            Some("already_submitted") => ClientError::AlreadySubmitted(message),
            Some("quiz_ended") => ClientError::SessionEnded(message),
            _ if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN => {
                ClientError::AccessDenied(message)
            }
            _ => ClientError::Server {
                status: status.as_u16(),
                message,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }

    /// Text suitable for showing to a person.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Transport(_) => {
                "Connection problem. Check your network and try again.".to_string()
            }
            ClientError::InFlight(action) => format!("Please wait, {} is still in progress.", action),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: &str, message: &str) -> ErrorBody {
        ErrorBody {
            message: Some(message.to_string()),
            code: Some(code.to_string()),
        }
    }

    #[test]
    fn test_server_message_is_verbatim() {
        let err = ClientError::from_response(
            StatusCode::CONFLICT,
            body("command_rejected", "cannot start a quiz that is live"),
        );
        assert_eq!(err, ClientError::CommandRejected("cannot start a quiz that is live".to_string()));
        assert_eq!(err.user_message(), "cannot start a quiz that is live");
    }

    #[test]
    fn test_missing_message_falls_back_to_generic() {
        let err = ClientError::from_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorBody::default());
        assert_eq!(err.user_message(), GENERIC_FAILURE);
    }

    #[test]
    fn test_codes_map_to_variants() {
        assert!(matches!(
            ClientError::from_response(StatusCode::CONFLICT, body("quiz_not_started", "x")),
            ClientError::NotLive(_)
        ));
        assert!(matches!(
            ClientError::from_response(StatusCode::UNAUTHORIZED, ErrorBody::default()),
            ClientError::AccessDenied(_)
        ));
        assert!(matches!(
            ClientError::from_response(StatusCode::CONFLICT, body("quiz_ended", "x")),
            ClientError::SessionEnded(_)
        ));
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(!ClientError::NotLive("x".into()).is_retryable());
    }
}
