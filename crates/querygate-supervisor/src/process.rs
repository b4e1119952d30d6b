//! Managed servers as child processes

use std::process::Stdio;

use async_trait::async_trait;
use querygate_core::{EnvironmentBundle, ManagedServerSpec};
use tokio::process::{Child, Command};
use tracing::{debug, info, trace, warn};

use crate::error::{SupervisorError, SupervisorResult};
use crate::launcher::{RunningServer, ServerLauncher};

/// Spawns `entrypoint` as a child process with the bundle as its environment.
///
/// Each child leads its own process group. Graceful shutdown is `SIGTERM` and
/// forced termination is `SIGKILL`, both sent to the whole group, so a server
/// started through a wrapper (`sh -c`, a version-manager shim) is stopped
/// together with its wrapper. Once the group leader has exited, whatever is
/// left of the group is killed. Dropping the handle kills the group as well.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    /// Extra variables set on every child, after the bundle
    extra_env: Vec<(String, String)>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.push((key.into(), value.into()));
        self
    }

    fn spawn(
        &self,
        spec: &ManagedServerSpec,
        bundle: &EnvironmentBundle,
    ) -> SupervisorResult<RunningProcess> {
        let mut command = Command::new(&spec.entrypoint.program);
        command
            .args(&spec.entrypoint.args)
            .envs(bundle.to_env(spec))
            .envs(self.extra_env.iter().cloned())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| SupervisorError::launch(&spec.name, e.to_string()))?;

        info!(
            server = %spec.name,
            port = spec.port,
            pid = child.id().unwrap_or_default(),
            command = %spec.entrypoint,
            "Spawned managed server process"
        );

        Ok(RunningProcess {
            name: spec.name.clone(),
            pgid: child.id(),
            child,
            status: None,
            exited: false,
        })
    }
}

#[async_trait]
impl ServerLauncher for ProcessLauncher {
    async fn launch(
        &self,
        spec: &ManagedServerSpec,
        bundle: &EnvironmentBundle,
    ) -> SupervisorResult<Box<dyn RunningServer>> {
        Ok(Box::new(self.spawn(spec, bundle)?))
    }
}

struct RunningProcess {
    name: String,
    /// Process group led by the child; equal to its pid
    pgid: Option<u32>,
    child: Child,
    status: Option<std::process::ExitStatus>,
    exited: bool,
}

impl RunningProcess {
    /// Send `signal` to every process in the child's group
    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) -> bool {
        let Some(pgid) = self.pgid else {
            return false;
        };
        let sent = unsafe { libc::kill(-(pgid as libc::pid_t), signal) } == 0;
        if !sent {
            trace!(server = %self.name, pgid, signal, "Process group already gone");
        }
        sent
    }

    /// Kill what the group leader left behind
    fn kill_stragglers(&mut self) {
        #[cfg(unix)]
        {
            if self.signal_group(libc::SIGKILL) {
                debug!(server = %self.name, "Killed processes left in the group");
            }
        }
        self.pgid = None;
    }

    fn log_exit(&mut self, status: std::io::Result<std::process::ExitStatus>) {
        self.exited = true;
        self.kill_stragglers();
        match status {
            Ok(status) => {
                debug!(server = %self.name, %status, "Managed server process exited");
                self.status = Some(status);
            }
            Err(e) => warn!(server = %self.name, error = %e, "Failed to reap managed server"),
        }
    }
}

#[async_trait]
impl RunningServer for RunningProcess {
    fn describe(&self) -> String {
        match self.child.id() {
            Some(pid) => format!("pid {}", pid),
            None => "exited process".to_string(),
        }
    }

    fn request_shutdown(&mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        #[cfg(unix)]
        self.signal_group(libc::SIGTERM);
        #[cfg(not(unix))]
        {
            if let Err(e) = self.child.start_kill() {
                warn!(server = %self.name, error = %e, "Failed to stop managed server");
            }
        }
        debug!(server = %self.name, pid, "Sent graceful shutdown signal");
    }

    async fn wait(&mut self) {
        if self.exited {
            return;
        }
        let status = self.child.wait().await;
        self.log_exit(status);
    }

    fn has_exited(&mut self) -> bool {
        if self.exited {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.log_exit(Ok(status));
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.log_exit(Err(e));
                true
            }
        }
    }

    async fn terminate(&mut self) {
        if self.exited {
            return;
        }
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL);
        // kill() sends SIGKILL to the leader and reaps it
        if let Err(e) = self.child.kill().await {
            warn!(server = %self.name, error = %e, "Failed to kill managed server");
        }
        self.exited = true;
        self.kill_stragglers();
    }
}

impl Drop for RunningProcess {
    fn drop(&mut self) {
        if !self.exited {
            self.kill_stragglers();
        }
    }
}
