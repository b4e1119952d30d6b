//! ServerSupervisor - lifecycle of every managed server
//!
//! Each managed server lives in its own slot:
//! - a `RwLock`ed [`ManagedServerState`], copied out for readers and never
//!   held across an `.await`
//! - an `AtomicBool` restart flag, taken by compare-and-swap so a second
//!   restart of the same server fails fast instead of queueing
//! - an async mutex around the running unit, held for the whole of a start,
//!   stop or restart so those never interleave for one server
//!
//! Slots are independent: nothing done to one server waits on another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use querygate_core::{EnvironmentBundle, ManagedServerSpec, ManagedServerState, ServerStatus};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{SupervisorError, SupervisorResult};
use crate::launcher::{RunningServer, ServerLauncher};
use crate::readiness::{wait_for_port_release, ReadinessConfig, ReadinessProbe};

/// Supervisor timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Graceful shutdown bound; the unit is force-terminated after it
    pub shutdown_timeout: Duration,
    /// How long to wait for the port to become bindable after a stop
    pub port_release_timeout: Duration,
    pub readiness: ReadinessConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(3),
            port_release_timeout: Duration::from_secs(1),
            readiness: ReadinessConfig::default(),
        }
    }
}

/// Result of a lifecycle operation on one server
#[derive(Debug)]
pub struct ServerOutcome {
    pub name: String,
    pub result: SupervisorResult<()>,
}

impl ServerOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

type UnitSlot = Option<Box<dyn RunningServer>>;

struct ServerSlot {
    spec: ManagedServerSpec,
    state: RwLock<ManagedServerState>,
    restarting: AtomicBool,
    unit: Mutex<UnitSlot>,
}

impl ServerSlot {
    fn new(spec: ManagedServerSpec) -> Self {
        Self {
            state: RwLock::new(ManagedServerState::new(&spec)),
            spec,
            restarting: AtomicBool::new(false),
            unit: Mutex::new(None),
        }
    }

    fn name(&self) -> &str {
        &self.spec.name
    }

    fn status(&self) -> ServerStatus {
        self.state.read().status
    }

    fn set_status(&self, next: ServerStatus) -> bool {
        let mut state = self.state.write();
        let from = state.status;
        let moved = state.transition(next);
        if moved {
            debug!(server = %self.spec.name, %from, to = %next, "Status changed");
        } else {
            debug!(server = %self.spec.name, %from, to = %next, "Ignoring illegal status change");
        }
        moved
    }

    fn fail(&self, message: &str) -> bool {
        self.state.write().fail(message)
    }
}

/// Holds a slot's restart flag; releases it on drop, including on panic or
/// cancellation of the restarting future
struct RestartGuard<'a> {
    slot: &'a ServerSlot,
}

impl<'a> RestartGuard<'a> {
    fn acquire(slot: &'a ServerSlot) -> Option<Self> {
        slot.restarting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        slot.state.write().restart_in_progress = true;
        Some(Self { slot })
    }
}

impl Drop for RestartGuard<'_> {
    fn drop(&mut self) {
        self.slot.state.write().restart_in_progress = false;
        self.slot.restarting.store(false, Ordering::Release);
    }
}

/// Starts, stops and restarts the managed servers
pub struct ServerSupervisor {
    slots: Vec<ServerSlot>,
    launcher: Arc<dyn ServerLauncher>,
    bundle: RwLock<Option<EnvironmentBundle>>,
    probe: ReadinessProbe,
    config: SupervisorConfig,
    shutting_down: AtomicBool,
}

impl ServerSupervisor {
    pub fn new(
        specs: Vec<ManagedServerSpec>,
        launcher: Arc<dyn ServerLauncher>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            slots: specs.into_iter().map(ServerSlot::new).collect(),
            launcher,
            bundle: RwLock::new(None),
            probe: ReadinessProbe::new(config.readiness.clone()),
            config,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn specs(&self) -> Vec<ManagedServerSpec> {
        self.slots.iter().map(|slot| slot.spec.clone()).collect()
    }

    /// State of every server, in configuration order
    pub fn snapshot(&self) -> Vec<ManagedServerState> {
        self.slots
            .iter()
            .map(|slot| slot.state.read().clone())
            .collect()
    }

    pub fn state(&self, name: &str) -> Option<ManagedServerState> {
        self.find(name).map(|slot| slot.state.read().clone())
    }

    pub fn status(&self, name: &str) -> Option<ServerStatus> {
        self.find(name).map(ServerSlot::status)
    }

    /// Bundle used for the next start or restart
    pub fn bundle(&self) -> Option<EnvironmentBundle> {
        self.bundle.read().clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Start every server concurrently with `bundle`.
    ///
    /// One server failing does not stop the others; the outcome of each is
    /// returned in configuration order.
    pub async fn start_all(&self, bundle: EnvironmentBundle) -> Vec<ServerOutcome> {
        *self.bundle.write() = Some(bundle.clone());
        info!(servers = self.slots.len(), "Starting managed servers");

        let outcomes = join_all(self.slots.iter().map(|slot| {
            let bundle = &bundle;
            async move {
                let mut unit = slot.unit.lock().await;
                let result = self.start_unit(slot, &mut unit, bundle).await;
                ServerOutcome {
                    name: slot.spec.name.clone(),
                    result,
                }
            }
        }))
        .await;

        let running = outcomes.iter().filter(|o| o.is_ok()).count();
        if running == outcomes.len() {
            info!(running, "All managed servers running");
        } else {
            warn!(
                running,
                failed = outcomes.len() - running,
                "Some managed servers failed to start"
            );
        }
        outcomes
    }

    /// Restart one server with the current bundle
    pub async fn restart(&self, name: &str) -> SupervisorResult<()> {
        self.restart_with(name, None).await
    }

    /// Restart one server, optionally installing a new bundle first.
    ///
    /// Fails fast with [`SupervisorError::AlreadyRestarting`] if a restart of
    /// the same server is in flight. The old unit gets `shutdown_timeout` to
    /// exit on its own before it is force-terminated; its port must then be
    /// free before the new unit is launched.
    pub async fn restart_with(
        &self,
        name: &str,
        bundle: Option<EnvironmentBundle>,
    ) -> SupervisorResult<()> {
        let slot = self
            .find(name)
            .ok_or_else(|| SupervisorError::UnknownServer(name.to_string()))?;
        if self.is_shutting_down() {
            return Err(SupervisorError::ShuttingDown);
        }
        let _guard = RestartGuard::acquire(slot)
            .ok_or_else(|| SupervisorError::AlreadyRestarting(name.to_string()))?;

        let bundle = match bundle {
            Some(bundle) => {
                *self.bundle.write() = Some(bundle.clone());
                bundle
            }
            None => self
                .bundle()
                .ok_or_else(|| SupervisorError::NoEnvironment(name.to_string()))?,
        };

        info!(server = %name, port = slot.spec.port, "Restarting managed server");
        let started = Instant::now();

        let mut unit = slot.unit.lock().await;
        self.stop_unit(slot, &mut unit).await?;
        self.start_unit(slot, &mut unit, &bundle).await?;
        drop(unit);

        slot.state.write().restarts += 1;
        info!(
            server = %name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Managed server restarted"
        );
        Ok(())
    }

    /// Restart every server concurrently with the current bundle
    pub async fn restart_all(&self) -> Vec<ServerOutcome> {
        join_all(self.slots.iter().map(|slot| async move {
            ServerOutcome {
                name: slot.spec.name.clone(),
                result: self.restart(slot.name()).await,
            }
        }))
        .await
    }

    /// Stop every server concurrently and refuse further starts
    pub async fn stop_all(&self) -> Vec<ServerOutcome> {
        self.shutting_down.store(true, Ordering::Release);
        info!("Stopping all managed servers");

        join_all(self.slots.iter().map(|slot| async move {
            let mut unit = slot.unit.lock().await;
            let result = self.stop_unit(slot, &mut unit).await;
            if let Err(e) = &result {
                warn!(server = %slot.name(), error = %e, "Managed server did not stop cleanly");
            }
            ServerOutcome {
                name: slot.spec.name.clone(),
                result,
            }
        }))
        .await
    }

    /// Mark every `Running` server whose unit has exited as `Failed`.
    ///
    /// Servers busy with a lifecycle operation are skipped. Returns the names
    /// of the servers marked.
    pub fn reap_exited(&self) -> Vec<String> {
        let mut failed = Vec::new();
        for slot in &self.slots {
            if slot.status() != ServerStatus::Running || slot.restarting.load(Ordering::Acquire)
            {
                continue;
            }
            let Ok(mut unit) = slot.unit.try_lock() else {
                continue;
            };
            let exited = unit.as_mut().map_or(true, |u| u.has_exited());
            if exited && slot.fail("exited unexpectedly") {
                error!(
                    server = %slot.name(),
                    port = slot.spec.port,
                    "Managed server exited unexpectedly"
                );
                failed.push(slot.spec.name.clone());
            }
        }
        failed
    }

    fn find(&self, name: &str) -> Option<&ServerSlot> {
        self.slots.iter().find(|slot| slot.spec.name == name)
    }

    async fn stop_unit(&self, slot: &ServerSlot, unit: &mut UnitSlot) -> SupervisorResult<()> {
        let name = slot.name();
        let Some(mut running) = unit.take() else {
            // Nothing to stop; a failed slot still walks to Stopped
            if slot.status() == ServerStatus::Failed {
                slot.set_status(ServerStatus::Stopping);
                slot.set_status(ServerStatus::Stopped);
            }
            return Ok(());
        };

        slot.set_status(ServerStatus::Stopping);
        running.request_shutdown();

        let bound = self.config.shutdown_timeout;
        if tokio::time::timeout(bound, running.wait()).await.is_err() {
            warn!(
                server = %name,
                unit = %running.describe(),
                timeout_ms = bound.as_millis() as u64,
                "Graceful shutdown timed out, force-terminating"
            );
            running.terminate().await;
        } else {
            debug!(server = %name, "Managed server stopped gracefully");
        }
        drop(running);

        if !wait_for_port_release(slot.spec.port, self.config.port_release_timeout).await {
            let err = SupervisorError::PortNotReleased {
                name: name.to_string(),
                port: slot.spec.port,
            };
            error!(server = %name, port = slot.spec.port, "Port not released after stop");
            slot.fail(&err.to_string());
            return Err(err);
        }

        slot.set_status(ServerStatus::Stopped);
        Ok(())
    }

    async fn start_unit(
        &self,
        slot: &ServerSlot,
        unit: &mut UnitSlot,
        bundle: &EnvironmentBundle,
    ) -> SupervisorResult<()> {
        let name = slot.name();
        if self.is_shutting_down() {
            return Err(SupervisorError::ShuttingDown);
        }
        if !slot.set_status(ServerStatus::Starting) {
            return Err(SupervisorError::launch(
                name,
                format!("cannot start from status {}", slot.status()),
            ));
        }

        let running = match self.launcher.launch(&slot.spec, bundle).await {
            Ok(running) => running,
            Err(e) => {
                error!(server = %name, error = %e, "Failed to launch managed server");
                slot.fail(&e.to_string());
                return Err(e);
            }
        };
        *unit = Some(running);

        match self.await_ready(slot, unit).await {
            Ok(()) => {
                slot.set_status(ServerStatus::Running);
                info!(server = %name, port = slot.spec.port, "Managed server running");
                Ok(())
            }
            Err(e) => {
                warn!(server = %name, error = %e, "Managed server failed to become ready");
                slot.fail(&e.to_string());
                if let Some(mut running) = unit.take() {
                    running.terminate().await;
                }
                Err(e)
            }
        }
    }

    async fn await_ready(&self, slot: &ServerSlot, unit: &mut UnitSlot) -> SupervisorResult<()> {
        let config = self.probe.config();
        let deadline = Instant::now() + config.readiness_timeout;

        loop {
            if unit.as_mut().map_or(true, |u| u.has_exited()) {
                return Err(SupervisorError::ExitedDuringStartup {
                    name: slot.spec.name.clone(),
                });
            }
            if self.probe.check(slot.spec.port).await {
                return Ok(());
            }
            if self.is_shutting_down() {
                return Err(SupervisorError::ShuttingDown);
            }
            if Instant::now() >= deadline {
                return Err(SupervisorError::NotReady {
                    name: slot.spec.name.clone(),
                    timeout_ms: config.readiness_timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(config.probe_interval).await;
        }
    }
}
