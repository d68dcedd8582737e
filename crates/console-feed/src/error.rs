//! Error handling for the console feed.

use std::time::Duration;

use thiserror::Error;

/// The main result type used throughout the crate.
pub type FeedResult<T> = Result<T, FeedError>;

/// Authentication and session errors.
///
/// These are surfaced to the caller of login/refresh so they can be shown to
/// the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The API rejected the request. The message is the API's own, verbatim.
    #[error("{0}")]
    Rejected(String),

    /// The token is structurally invalid or its claims could not be decoded.
    #[error("Malformed token")]
    MalformedToken,

    /// The token's expiry is in the past.
    #[error("Session expired")]
    Expired,

    /// No session is present.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// A refresh attempt failed; the session has been torn down.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Comprehensive error type for all feed operations.
#[derive(Error, Debug)]
pub enum FeedError {
    /// Authentication and authorization errors
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// HTTP errors from the collaborator API client
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API error response
    #[error("API error: status={status}, message={message}")]
    Api { status: u16, message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport failures (connect, read, close)
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Malformed inbound payloads
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Token store I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection {
            message: e.to_string(),
        }
    }
}

impl FeedError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Returns `true` if the API refused the caller's credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Api { status: 401 | 403, .. })
            || matches!(self, Self::Auth(AuthError::Rejected(_)))
    }

    /// Message suitable for user-visible display.
    ///
    /// API errors yield the API's message verbatim.
    pub fn user_message(&self) -> String {
        match self {
            Self::Api { message, .. } => message.clone(),
            Self::Auth(err) => err.to_string(),
            other => other.to_string(),
        }
    }
}
