//! Readiness probing and port release checks

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::trace;

/// Probe settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessConfig {
    /// Path probed on `127.0.0.1:<port>`
    pub health_path: String,
    /// Pause between probes
    pub probe_interval: Duration,
    /// Give up after this long
    pub readiness_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            health_path: "/health".to_string(),
            probe_interval: Duration::from_millis(100),
            readiness_timeout: Duration::from_secs(10),
        }
    }
}

/// Local HTTP health probe
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    client: reqwest::Client,
    config: ReadinessConfig,
}

impl ReadinessProbe {
    pub fn new(config: ReadinessConfig) -> Self {
        let per_probe = config
            .readiness_timeout
            .min(Duration::from_secs(1))
            .max(Duration::from_millis(50));
        // build() only fails when the TLS backend cannot initialise
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(per_probe)
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.config
    }

    /// One probe: `true` on any 2xx answer
    pub async fn check(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}{}", port, self.config.health_path);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                trace!(port, error = %e, "Readiness probe failed");
                false
            }
        }
    }
}

/// Wait until `127.0.0.1:port` can be bound again.
///
/// Returns `false` if the port is still taken after `timeout`.
pub async fn wait_for_port_release(port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => {
                drop(listener);
                return true;
            }
            Err(e) if Instant::now() < deadline => {
                trace!(port, error = %e, "Port still bound");
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
            Err(_) => return false,
        }
    }
}
