//! Launch abstraction for managed servers
//!
//! A [`ServerLauncher`] turns a spec and an environment bundle into a
//! [`RunningServer`] handle. The supervisor only talks to these traits, so a
//! managed server may be an OS process or an in-process task.

use async_trait::async_trait;
use querygate_core::{EnvironmentBundle, ManagedServerSpec};

use crate::error::SupervisorResult;

/// Starts managed servers
#[async_trait]
pub trait ServerLauncher: Send + Sync {
    /// Start `spec` bound to its port with `bundle` as its environment.
    ///
    /// Returns once the unit has been created; readiness is checked by the
    /// caller.
    async fn launch(
        &self,
        spec: &ManagedServerSpec,
        bundle: &EnvironmentBundle,
    ) -> SupervisorResult<Box<dyn RunningServer>>;
}

/// Handle to one launched unit
#[async_trait]
pub trait RunningServer: Send + Sync {
    /// Short identifier for logs (pid, task)
    fn describe(&self) -> String;

    /// Ask the unit to stop. Returns immediately.
    fn request_shutdown(&mut self);

    /// Resolve once the unit has exited
    async fn wait(&mut self);

    /// Non-blocking exit check
    fn has_exited(&mut self) -> bool;

    /// Stop the unit immediately and reap it. Every connection it owns is
    /// closed and its port released.
    async fn terminate(&mut self);
}
