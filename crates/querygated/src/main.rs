//! querygated - querygate daemon
//!
//! Resolves the tenant account, starts every managed query server with its
//! environment bundle, and serves the public gateway on the base port.
//!
//! Usage:
//!   querygated [OPTIONS]
//!
//! Signals:
//!   SIGINT/SIGTERM  stop accepting, stop every managed server, exit
//!   SIGHUP          restart every managed server with the current bundle

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use querygate_account::{AccountResolver, AccountState, HttpAccountSource};
use querygate_api::{create_router, AppState};
use querygate_core::{Entrypoint, ManagedServerSpec};
use querygate_supervisor::{Monitor, ProcessLauncher, ServerSupervisor};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::{DaemonConfig, Overrides};

/// How long open client connections get once every managed server is down
const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "querygated")]
#[command(about = "Supervises managed query servers and proxies them behind one endpoint")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long, env = "QUERYGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway port; managed servers listen on base port + offset
    #[arg(long, env = "QUERYGATE_BASE_PORT")]
    base_port: Option<u16>,

    /// Upstream account resolution endpoint
    #[arg(long, env = "QUERYGATE_ACCOUNT_URL")]
    account_url: Option<String>,

    /// Account id used when resolution fails
    #[arg(long, env = "QUERYGATE_FALLBACK_ACCOUNT_ID")]
    fallback_account_id: Option<String>,

    /// Account resolution attempts before falling back
    #[arg(long, env = "QUERYGATE_ACCOUNT_ATTEMPTS")]
    account_attempts: Option<u32>,

    /// Graceful stop bound for managed servers, in milliseconds
    #[arg(long, env = "QUERYGATE_SHUTDOWN_TIMEOUT_MS")]
    shutdown_timeout_ms: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long, env = "QUERYGATE_LOG_JSON")]
    log_json: bool,

    /// Enable debug logging for querygate crates
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            base_port: self.base_port,
            account_url: self.account_url.clone(),
            fallback_account_id: self.fallback_account_id.clone(),
            account_attempts: self.account_attempts,
            shutdown_timeout_ms: self.shutdown_timeout_ms,
        }
    }
}

fn init_tracing(json: bool, verbose: bool) {
    let default_filter = if verbose {
        "querygated=debug,querygate_supervisor=debug,querygate_api=debug,querygate_account=debug,tower_http=debug"
    } else {
        "querygated=info,querygate_supervisor=info,querygate_api=info,querygate_account=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json, args.verbose);

    info!("Starting querygated");

    // Configuration errors are the only fatal ones
    let config = DaemonConfig::resolve(args.config.as_deref(), &args.overrides())
        .context("Configuration rejected")?;
    let listen_addr = config.listen_addr()?;
    let specs: Vec<ManagedServerSpec> = config
        .server_specs()?
        .into_iter()
        .map(locate_sibling_program)
        .collect();
    for spec in &specs {
        info!(server = %spec.name, port = spec.port, command = %spec.entrypoint, "Managed server");
    }

    // Account resolution never fails; a fallback is flagged as degraded
    let source = HttpAccountSource::with_config(
        &config.account.url,
        &config.account.field,
        config.attempt_timeout(),
    )?;
    let resolver = Arc::new(AccountResolver::new(
        Arc::new(source),
        config.resolver_config(),
    ));
    let account = resolver.resolve().await;
    let accounts = Arc::new(AccountState::new());
    accounts.accept(account.clone());

    let composer = Arc::new(config.composer());
    let bundle = composer.compose(&account);

    let mut launcher = ProcessLauncher::new();
    if args.log_json {
        launcher = launcher.with_env("QUERYGATE_LOG_JSON", "true");
    }
    let supervisor = Arc::new(ServerSupervisor::new(
        specs,
        Arc::new(launcher),
        config.supervisor_config(),
    ));

    let outcomes = supervisor.start_all(bundle).await;
    let started = outcomes.iter().filter(|o| o.is_ok()).count();
    info!(started, total = outcomes.len(), "Managed servers started");

    let monitor = Monitor::spawn(supervisor.clone(), config.monitor_interval());

    let state = AppState::new(
        supervisor.clone(),
        accounts,
        composer,
        config.forward_config(),
    )?
    .with_resolver(resolver);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    info!("Listening on http://{}", listen_addr);

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let server = tokio::spawn(
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = stop_rx.wait_for(|stop| *stop).await;
        })
        .into_future(),
    );

    #[cfg(unix)]
    let reload = tokio::spawn(restart_on_hangup(supervisor.clone()));

    shutdown_signal().await;

    // Stop accepting first; streams still open end once their servers stop
    let _ = stop_tx.send(true);
    #[cfg(unix)]
    reload.abort();
    monitor.shutdown().await;

    let outcomes = supervisor.stop_all().await;
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        warn!(failed, "Some managed servers did not stop cleanly");
    }

    match tokio::time::timeout(CONNECTION_DRAIN_TIMEOUT, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "Gateway server error"),
        Ok(Err(e)) => error!(error = %e, "Gateway server task failed"),
        Err(_) => warn!("Client connections still open, exiting anyway"),
    }

    info!("querygated stopped");
    Ok(())
}

/// Prefer a program installed next to this binary over a `PATH` lookup
fn locate_sibling_program(mut spec: ManagedServerSpec) -> ManagedServerSpec {
    let program = Path::new(&spec.entrypoint.program);
    if program.components().count() != 1 {
        return spec;
    }
    let sibling = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(program)));
    if let Some(sibling) = sibling.filter(|p| p.is_file()) {
        spec.entrypoint = Entrypoint::new(
            sibling.display().to_string(),
            spec.entrypoint.args.clone(),
        );
    }
    spec
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(unix)]
async fn restart_on_hangup(supervisor: Arc<ServerSupervisor>) {
    let mut sighup =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
            Ok(signal) => signal,
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGHUP");
                return;
            }
        };

    while sighup.recv().await.is_some() {
        info!("Received SIGHUP, restarting managed servers");
        let outcomes = supervisor.restart_all().await;
        for outcome in outcomes.iter().filter(|o| !o.is_ok()) {
            if let Err(e) = &outcome.result {
                warn!(server = %outcome.name, error = %e, "Restart failed");
            }
        }
    }
}
