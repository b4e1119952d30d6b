//! Periodic supervision job

use std::sync::Arc;
use std::time::Duration;

use querygate_core::ServerStatus;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::supervisor::ServerSupervisor;

/// Default pause between supervision passes
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest accepted pause between passes
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(10);

/// Recurring job that notices managed servers dying on their own.
///
/// Each tick marks `Running` servers whose unit has exited as `Failed` and
/// logs a summary. The job stops when [`Monitor::shutdown`] is called or the
/// handle is dropped.
pub struct Monitor {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Intervals below [`MIN_MONITOR_INTERVAL`] are raised to it.
    pub fn spawn(supervisor: Arc<ServerSupervisor>, interval: Duration) -> Self {
        if interval < MIN_MONITOR_INTERVAL {
            warn!(
                interval_ms = interval.as_millis() as u64,
                "Monitor interval too short, using the minimum"
            );
        }
        let interval = interval.max(MIN_MONITOR_INTERVAL);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => run_pass(&supervisor),
                    _ = shutdown_rx.wait_for(|stop| *stop) => break,
                }
            }
            debug!("Monitor stopped");
        });

        debug!(interval_ms = interval.as_millis() as u64, "Monitor started");
        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Stop the job and wait for the current pass to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Monitor task ended abnormally");
            }
        }
    }

    /// Whether the job is still scheduled
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn run_pass(supervisor: &ServerSupervisor) {
    let newly_failed = supervisor.reap_exited();
    let snapshot = supervisor.snapshot();
    let running = snapshot
        .iter()
        .filter(|s| s.status == ServerStatus::Running)
        .count();
    let total = snapshot.len();

    if running == total {
        debug!(running, total, "All managed servers running");
    } else {
        let down: Vec<_> = snapshot
            .iter()
            .filter(|s| s.status != ServerStatus::Running)
            .map(|s| format!("{}={}", s.name, s.status))
            .collect();
        warn!(
            running,
            total,
            newly_failed = newly_failed.len(),
            down = %down.join(","),
            "Managed servers not running"
        );
    }
}
