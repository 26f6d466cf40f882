//! Error types for the platform clients

use cibridge_core::ports::PlatformError;
use thiserror::Error;

/// Errors raised while talking to GitLab or GitHub.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// The server answered with a non-success status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never produced a response
    #[error("request failed: {0}")]
    Request(String),

    /// Response body did not have the expected shape
    #[error("cannot decode response: {0}")]
    Decode(String),

    /// Credentials missing, rejected, or not exchangeable for a token
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Base URL cannot carry an API path
    #[error("invalid base URL: {0}")]
    Url(String),
}

impl From<reqwest::Error> for ForgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ForgeError::Decode(err.to_string())
        } else {
            ForgeError::Request(err.to_string())
        }
    }
}

impl From<ForgeError> for PlatformError {
    fn from(err: ForgeError) -> Self {
        match err {
            ForgeError::Http { status, message } => PlatformError::Http { status, message },
            ForgeError::Request(msg) | ForgeError::Url(msg) => PlatformError::Transport(msg),
            ForgeError::Decode(msg) => PlatformError::Decode(msg),
            ForgeError::Auth(msg) => PlatformError::Auth(msg),
        }
    }
}

/// Result type for platform client operations
pub type Result<T> = std::result::Result<T, ForgeError>;
