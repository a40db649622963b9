//! Shared error type across mqbridge crates.

use thiserror::Error;

/// Stable error codes (logs, metrics labels, tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Publish attempted while the broker link is down.
    NotConnected,
    /// Viewer or broker payload failed to parse.
    MalformedMessage,
    /// Session id already registered.
    DuplicateSession,
    /// Session id not registered.
    NotFound,
    /// Connection reset, write failure, broker client error.
    Transport,
    /// Invalid configuration.
    BadConfig,
    /// Unsupported config version.
    UnsupportedVersion,
    /// Viewer listener could not be bound.
    BindFailed,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotConnected => "NOT_CONNECTED",
            ErrorCode::MalformedMessage => "MALFORMED_MESSAGE",
            ErrorCode::DuplicateSession => "DUPLICATE_SESSION",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::BadConfig => "BAD_CONFIG",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::BindFailed => "BIND_FAILED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Unified error type used by core and gateway.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("broker link not connected")]
    NotConnected,
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("duplicate session: {0}")]
    DuplicateSession(u64),
    #[error("session not found: {0}")]
    NotFound(u64),
    #[error("transport: {0}")]
    Transport(String),
    #[error("bad config: {0}")]
    BadConfig(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("bind failed: {0}")]
    BindFailed(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::NotConnected => ErrorCode::NotConnected,
            BridgeError::MalformedMessage(_) => ErrorCode::MalformedMessage,
            BridgeError::DuplicateSession(_) => ErrorCode::DuplicateSession,
            BridgeError::NotFound(_) => ErrorCode::NotFound,
            BridgeError::Transport(_) => ErrorCode::Transport,
            BridgeError::BadConfig(_) => ErrorCode::BadConfig,
            BridgeError::UnsupportedVersion => ErrorCode::UnsupportedVersion,
            BridgeError::BindFailed(_) => ErrorCode::BindFailed,
            BridgeError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Errors that end the process instead of being isolated to one session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::BadConfig(_) | BridgeError::UnsupportedVersion | BridgeError::BindFailed(_)
        )
    }
}
