//! Error taxonomy shared by every gateway component

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::models::ServerStatus;

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Broad error classes.
///
/// The class decides how an error is surfaced: dependency problems are
/// recovered locally, routing problems are the caller's fault, upstream
/// problems become gateway errors, lifecycle problems are reported through
/// the health document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DependencyUnavailable,
    Routing,
    UpstreamFailure,
    Lifecycle,
    Config,
}

/// Errors that can occur while routing, forwarding or supervising
#[derive(Debug, Error)]
pub enum GatewayError {
    /// First path segment does not name a managed server
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// Forward path failed validation (traversal, encoded separators, ...)
    #[error("Rejected path: {0}")]
    PathRejected(String),

    /// Target server exists but is not routable right now
    #[error("Server '{name}' is not running (status: {status})")]
    ServerUnavailable { name: String, status: ServerStatus },

    /// A dependency (account endpoint, managed server) could not be reached
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Could not connect to the managed server
    #[error("Upstream connection failed: {0}")]
    UpstreamConnect(String),

    /// Managed server did not answer within the request budget
    #[error("Upstream timed out after {0:?}")]
    UpstreamTimeout(Duration),

    /// Managed server connection broke mid-exchange
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// A restart for this server is already in flight
    #[error("Restart already in progress for '{0}'")]
    AlreadyRestarting(String),

    /// Server failed to start, become ready, or release its port
    #[error("Lifecycle failure for '{name}': {message}")]
    Lifecycle { name: String, message: String },

    /// Invalid static configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl GatewayError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::UnknownServer(_) => 404,
            GatewayError::PathRejected(_) => 400,
            GatewayError::ServerUnavailable { .. } => 503,
            GatewayError::DependencyUnavailable(_) => 503,
            GatewayError::UpstreamConnect(_) => 502,
            GatewayError::UpstreamTimeout(_) => 504,
            GatewayError::Upstream(_) => 502,
            GatewayError::AlreadyRestarting(_) => 409,
            GatewayError::Lifecycle { .. } => 500,
            GatewayError::Config(_) => 500,
        }
    }

    /// Returns the taxonomy class for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::UnknownServer(_) | GatewayError::PathRejected(_) => ErrorKind::Routing,
            GatewayError::ServerUnavailable { .. } | GatewayError::DependencyUnavailable(_) => {
                ErrorKind::DependencyUnavailable
            }
            GatewayError::UpstreamConnect(_)
            | GatewayError::UpstreamTimeout(_)
            | GatewayError::Upstream(_) => ErrorKind::UpstreamFailure,
            GatewayError::AlreadyRestarting(_) | GatewayError::Lifecycle { .. } => {
                ErrorKind::Lifecycle
            }
            GatewayError::Config(_) => ErrorKind::Config,
        }
    }

    /// Shorthand for a lifecycle failure
    pub fn lifecycle(name: &str, message: impl Into<String>) -> Self {
        GatewayError::Lifecycle {
            name: name.to_string(),
            message: message.into(),
        }
    }
}
