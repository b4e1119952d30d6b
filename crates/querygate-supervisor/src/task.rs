//! Managed servers as in-process tasks
//!
//! Each unit is an axum [`Router`] served by its own accept loop. The loop
//! owns every connection task in a [`JoinSet`], so aborting the loop closes
//! every connection it accepted, streaming ones included.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use querygate_core::{EnvironmentBundle, ManagedServerSpec};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::error::{SupervisorError, SupervisorResult};
use crate::launcher::{RunningServer, ServerLauncher};

/// Builds the router for one managed server
pub type RouterFactory =
    Arc<dyn Fn(&ManagedServerSpec, &EnvironmentBundle) -> Router + Send + Sync>;

/// Default time connections get to finish after a graceful shutdown request
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Launches routers produced by a [`RouterFactory`] on `127.0.0.1:<port>`
#[derive(Clone)]
pub struct TaskLauncher {
    factory: RouterFactory,
    drain_timeout: Option<Duration>,
}

impl TaskLauncher {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&ManagedServerSpec, &EnvironmentBundle) -> Router + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            drain_timeout: Some(DEFAULT_DRAIN_TIMEOUT),
        }
    }

    /// Bound on connection draining after graceful shutdown.
    ///
    /// `None` waits for every connection to finish on its own, which makes
    /// a unit with an open event stream ignore graceful shutdown.
    pub fn with_drain_timeout(mut self, drain_timeout: Option<Duration>) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

#[async_trait]
impl ServerLauncher for TaskLauncher {
    async fn launch(
        &self,
        spec: &ManagedServerSpec,
        bundle: &EnvironmentBundle,
    ) -> SupervisorResult<Box<dyn RunningServer>> {
        let listener = TcpListener::bind(("127.0.0.1", spec.port))
            .await
            .map_err(|e| SupervisorError::launch(&spec.name, format!("bind: {}", e)))?;

        let router = (self.factory)(spec, bundle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(serve(
            spec.name.clone(),
            listener,
            router,
            shutdown_rx,
            self.drain_timeout,
        ));

        info!(server = %spec.name, port = spec.port, "Started in-process managed server");

        Ok(Box::new(RunningTask {
            port: spec.port,
            handle,
            shutdown_tx,
            finished: false,
        }))
    }
}

async fn serve(
    name: String,
    listener: TcpListener,
    router: Router,
    shutdown: watch::Receiver<bool>,
    drain_timeout: Option<Duration>,
) {
    let mut connections = JoinSet::new();
    let mut stop_rx = shutdown.clone();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(server = %name, error = %e, "Accept failed");
                        continue;
                    }
                };
                debug!(server = %name, %peer, "Accepted connection");
                let service = TowerToHyperService::new(router.clone());
                let mut conn_shutdown = shutdown.clone();
                connections.spawn(async move {
                    let builder = auto::Builder::new(TokioExecutor::new());
                    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
                    tokio::pin!(conn);

                    tokio::select! {
                        result = conn.as_mut() => {
                            if let Err(e) = result {
                                debug!(error = %e, "Connection error");
                            }
                        }
                        _ = async { let _ = conn_shutdown.wait_for(|stop| *stop).await; } => {
                            conn.as_mut().graceful_shutdown();
                            let _ = conn.await;
                        }
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = async { let _ = stop_rx.wait_for(|stop| *stop).await; } => break,
        }
    }

    drop(listener);
    let open = connections.len();
    if open > 0 {
        debug!(server = %name, open, "Draining connections");
    }

    let drain = async { while connections.join_next().await.is_some() {} };
    match drain_timeout {
        Some(limit) => {
            if tokio::time::timeout(limit, drain).await.is_err() {
                debug!(
                    server = %name,
                    remaining = connections.len(),
                    "Drain bound reached, closing connections"
                );
            }
        }
        None => drain.await,
    }
    connections.shutdown().await;
    debug!(server = %name, "In-process server stopped");
}

struct RunningTask {
    port: u16,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    finished: bool,
}

#[async_trait]
impl RunningServer for RunningTask {
    fn describe(&self) -> String {
        format!("task on port {}", self.port)
    }

    fn request_shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn wait(&mut self) {
        if !self.finished {
            let _ = (&mut self.handle).await;
            self.finished = true;
        }
    }

    fn has_exited(&mut self) -> bool {
        self.finished || self.handle.is_finished()
    }

    async fn terminate(&mut self) {
        // Dropping the accept loop drops its JoinSet, aborting every connection
        self.handle.abort();
        self.wait().await;
    }
}
