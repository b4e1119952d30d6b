//! Demo managed server
//!
//! Reads its launch environment, binds `127.0.0.1:$QUERYGATE_PORT` and serves
//! until SIGTERM/SIGINT, then drains open connections for a bounded time.
//!
//! # Usage
//!
//! ```bash
//! QUERYGATE_PORT=8002 ./querygate-demo-server --role data
//! ```
//!
//! `--ignore-sigterm` makes the process ignore SIGTERM so the supervisor's
//! forced termination path can be observed.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use querygate_demo_server::{create_router, DemoEnv};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "querygate-demo-server")]
#[command(about = "Demo query server managed by querygated")]
struct Args {
    /// Server role; overrides QUERYGATE_SERVER_NAME
    #[arg(long)]
    role: Option<String>,

    /// Listen port; overrides QUERYGATE_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Keep serving on SIGTERM
    #[arg(long)]
    ignore_sigterm: bool,

    /// Bound on draining open connections after a stop signal
    #[arg(long, default_value_t = 1000)]
    drain_timeout_ms: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "QUERYGATE_LOG_JSON")]
    log_json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "querygate_demo_server=debug"
    } else {
        "querygate_demo_server=info"
    };
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let mut env = DemoEnv::from_env()
        .or_else(|e| match args.port {
            // A port on the command line is enough to run standalone
            Some(port) => DemoEnv::from_vars([("QUERYGATE_PORT".to_string(), port.to_string())]),
            None => Err(e),
        })
        .context("Invalid launch environment")?;
    if let Some(role) = args.role {
        env.role = role;
    }
    if let Some(port) = args.port {
        env.port = port;
    }

    let addr = SocketAddr::from(([127, 0, 0, 1], env.port));
    info!(
        role = %env.role,
        port = env.port,
        degraded = env.account_degraded,
        "Starting demo server"
    );

    let app = create_router(Arc::new(env));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.wait_for(|stop| *stop).await;
            })
            .into_future(),
    );

    wait_for_stop(args.ignore_sigterm).await;
    let _ = stop_tx.send(true);

    // Event streams never end on their own; cut them off after the drain bound
    let drain = Duration::from_millis(args.drain_timeout_ms);
    match tokio::time::timeout(drain, server).await {
        Ok(_) => info!("Demo server stopped"),
        Err(_) => warn!("Connections still open after drain, exiting"),
    }
    Ok(())
}

async fn wait_for_stop(ignore_sigterm: bool) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT, shutting down");
                    return;
                }
                _ = sigterm.recv() => {
                    if ignore_sigterm {
                        warn!("Received SIGTERM, ignoring");
                        continue;
                    }
                    info!("Received SIGTERM, shutting down");
                    return;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ignore_sigterm;
        let _ = tokio::signal::ctrl_c().await;
    }
}
