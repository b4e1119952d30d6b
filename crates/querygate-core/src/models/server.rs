//! Managed server models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};

/// How to start a managed server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrypoint {
    /// Executable (or in-process handler key)
    pub program: String,
    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,
}

impl Entrypoint {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a command line given as `[program, args...]`
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

impl fmt::Display for Entrypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Immutable description of one managed server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedServerSpec {
    /// Unique name, also the first path segment routed to this server
    pub name: String,
    /// Local port the server binds
    pub port: u16,
    /// Start command
    pub entrypoint: Entrypoint,
}

impl ManagedServerSpec {
    pub fn new(name: impl Into<String>, port: u16, entrypoint: Entrypoint) -> Self {
        Self {
            name: name.into(),
            port,
            entrypoint,
        }
    }

    /// Derive the port as `base_port + offset`.
    ///
    /// Fails when the sum does not fit a port number.
    pub fn with_offset(
        name: impl Into<String>,
        base_port: u16,
        offset: u16,
        entrypoint: Entrypoint,
    ) -> GatewayResult<Self> {
        let name = name.into();
        let port = base_port.checked_add(offset).ok_or_else(|| {
            GatewayError::Config(format!(
                "port for '{}' overflows: base {} + offset {}",
                name, base_port, offset
            ))
        })?;
        Ok(Self::new(name, port, entrypoint))
    }
}

/// Lifecycle status of a managed server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl ServerStatus {
    /// Whether `next` is a legal successor of `self`.
    ///
    /// A cycle runs `Stopped → Starting → Running → Stopping → Stopped|Failed`.
    /// `Failed` only leaves through an explicit restart, which either stops a
    /// still-present unit (`Stopping`) or starts afresh (`Starting`).
    pub fn can_transition_to(self, next: ServerStatus) -> bool {
        use ServerStatus::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                | (Failed, Stopping)
                | (Failed, Starting)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Running => "running",
            ServerStatus::Stopping => "stopping",
            ServerStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable lifecycle state of a managed server.
///
/// The supervisor owns the live copy; everyone else sees clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagedServerState {
    pub name: String,
    pub port: u16,
    pub status: ServerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub restart_in_progress: bool,
    /// Completed restart cycles
    pub restarts: u32,
    /// Time of the last status change
    pub since: DateTime<Utc>,
}

impl ManagedServerState {
    /// Initial `Stopped` state for a spec
    pub fn new(spec: &ManagedServerSpec) -> Self {
        Self {
            name: spec.name.clone(),
            port: spec.port,
            status: ServerStatus::Stopped,
            last_error: None,
            restart_in_progress: false,
            restarts: 0,
            since: Utc::now(),
        }
    }

    /// Only `Running` servers receive traffic
    pub fn is_routable(&self) -> bool {
        self.status == ServerStatus::Running
    }

    /// Move to `next` if the lifecycle allows it.
    ///
    /// Entering `Starting` or `Running` clears `last_error`; an illegal
    /// transition leaves the state untouched and returns `false`.
    pub fn transition(&mut self, next: ServerStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.since = Utc::now();
        if matches!(next, ServerStatus::Starting | ServerStatus::Running) {
            self.last_error = None;
        }
        true
    }

    /// Move to `Failed`, recording why
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.transition(ServerStatus::Failed) {
            self.last_error = Some(message.into());
            true
        } else {
            false
        }
    }
}
