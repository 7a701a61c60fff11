//! Session error types

use thiserror::Error;

/// Session error with classification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message)
    }

    pub fn insufficient_funds(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InsufficientFunds, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// Text shown to the user when this error ends an attempt.
    pub fn user_notice(&self) -> String {
        match self.kind {
            ErrorKind::Configuration => {
                "Conversation service is not configured. Please contact support.".to_string()
            }
            ErrorKind::PermissionDenied => {
                "Microphone access is required. Allow it in settings and try again.".to_string()
            }
            ErrorKind::Network => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            ErrorKind::Protocol | ErrorKind::Server => {
                "The server sent an unexpected response. Please try again later.".to_string()
            }
            ErrorKind::InsufficientFunds => {
                "Not enough coins for this package. Pick a shorter package or top up.".to_string()
            }
            ErrorKind::Persistence => {
                "The conversation ended, but its transcript could not be saved.".to_string()
            }
            ErrorKind::InvalidRequest => self.message.clone(),
        }
    }
}

/// Error classification for recovery decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid process configuration - fatal
    Configuration,
    /// Host refused microphone access - user can grant and retry
    PermissionDenied,
    /// Transport failure or timeout - user may retry
    Network,
    /// Response had an unexpected shape or content type
    Protocol,
    /// Server answered with a failure or malformed envelope
    Server,
    /// Not enough credit for the package
    InsufficientFunds,
    /// Transcript hand-off could not be written
    Persistence,
    /// Request not valid for the current session state
    InvalidRequest,
}

impl ErrorKind {
    /// Whether the user can reasonably retry the same action.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::Network | Self::InsufficientFunds | Self::InvalidRequest
        )
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::protocol(format!("Failed to decode response: {err}"))
        } else if err.is_timeout() {
            Self::network(format!("Request timed out: {err}"))
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::protocol(format!("Invalid JSON: {err}"))
    }
}
