//! Error types for account resolution

use std::time::Duration;

use querygate_core::GatewayError;
use thiserror::Error;

/// Result type alias for account operations
pub type AccountResult<T> = std::result::Result<T, AccountError>;

/// Reasons a single resolution attempt can fail
#[derive(Error, Debug)]
pub enum AccountError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid endpoint URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Endpoint answered with a non-success status
    #[error("Account endpoint returned {status}")]
    Status { status: u16 },

    /// Connection to the endpoint failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Attempt exceeded its time budget
    #[error("Attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Response body was not usable JSON
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// JSON body had no usable account id
    #[error("No account id in field '{0}'")]
    MissingField(String),
}

impl AccountError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            AccountError::Timeout(timeout)
        } else if err.is_connect() {
            AccountError::ConnectionFailed(err.to_string())
        } else {
            AccountError::HttpError(err)
        }
    }
}

impl From<AccountError> for GatewayError {
    fn from(err: AccountError) -> Self {
        GatewayError::DependencyUnavailable(err.to_string())
    }
}
