//! Supervisor errors

use querygate_core::GatewayError;
use thiserror::Error;

pub type SupervisorResult<T> = Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Restart already in progress for '{0}'")]
    AlreadyRestarting(String),

    #[error("Supervisor is shutting down")]
    ShuttingDown,

    /// `start_all` has not supplied an environment yet
    #[error("No environment bundle available for '{0}'")]
    NoEnvironment(String),

    #[error("Failed to launch '{name}': {message}")]
    LaunchFailed { name: String, message: String },

    #[error("'{name}' exited before becoming ready")]
    ExitedDuringStartup { name: String },

    #[error("'{name}' not ready after {timeout_ms} ms")]
    NotReady { name: String, timeout_ms: u64 },

    #[error("Port {port} of '{name}' still bound after stop")]
    PortNotReleased { name: String, port: u16 },
}

impl SupervisorError {
    pub fn launch(name: &str, message: impl Into<String>) -> Self {
        SupervisorError::LaunchFailed {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

impl From<SupervisorError> for GatewayError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::UnknownServer(name) => GatewayError::UnknownServer(name),
            SupervisorError::AlreadyRestarting(name) => GatewayError::AlreadyRestarting(name),
            SupervisorError::ShuttingDown => GatewayError::lifecycle("*", err.to_string()),
            SupervisorError::NoEnvironment(ref name)
            | SupervisorError::LaunchFailed { ref name, .. }
            | SupervisorError::ExitedDuringStartup { ref name }
            | SupervisorError::NotReady { ref name, .. }
            | SupervisorError::PortNotReleased { ref name, .. } => {
                GatewayError::lifecycle(name, err.to_string())
            }
        }
    }
}
