// Error handling module
// Defines the error taxonomy surfaced to callers of the client

use thiserror::Error;

/// Errors that can occur while executing an API request
#[derive(Error, Debug)]
pub enum ApiError {
    /// The access token is invalid and could not be refreshed.
    /// The session has been torn down; the caller must log in again.
    #[error("authentication expired")]
    AuthExpired,

    /// Non-auth error response from the backend (4xx/5xx other than 401)
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Underlying transport failed before a response was obtained
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Session persistence failed
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// True if this error means the session is gone and a new login is needed
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired)
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ApiError>;
