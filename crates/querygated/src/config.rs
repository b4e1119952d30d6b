//! Daemon configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then command-line
//! flags (which clap also fills from `QUERYGATE_*` environment variables).
//! Everything is validated before any managed server starts; a validation
//! failure is the only way the daemon refuses to come up.

use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use querygate_account::{ResolverConfig, DEFAULT_ACCOUNT_FIELD, DEFAULT_FALLBACK_ACCOUNT_ID};
use querygate_api::ForwardConfig;
use querygate_core::{
    Entrypoint, EnvironmentComposer, ManagedServerSpec, SecretRef, RESERVED_NAMES,
};
use querygate_supervisor::{ReadinessConfig, SupervisorConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Program started for each default managed server
pub const DEMO_SERVER_PROGRAM: &str = "querygate-demo-server";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Complete daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub account: AccountSection,

    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// Credential reference handed to managed servers
    #[serde(default)]
    pub secret: SecretRef,

    /// Logical backend name to base URL
    #[serde(default)]
    pub backends: BTreeMap<String, String>,

    /// Managed servers
    #[serde(default = "default_servers")]
    pub servers: Vec<ServerEntry>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            gateway: GatewaySection::default(),
            account: AccountSection::default(),
            supervisor: SupervisorSection::default(),
            secret: SecretRef::default(),
            backends: BTreeMap::new(),
            servers: default_servers(),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Public listener and forwarding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySection {
    /// Gateway port; managed server ports are offsets from it
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Budget for non-streaming forwarded requests
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Pause between supervision passes
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,
}

fn default_base_port() -> u16 {
    8000
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_monitor_interval_ms() -> u64 {
    30_000
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            bind_address: default_bind_address(),
            request_timeout_ms: default_request_timeout_ms(),
            monitor_interval_ms: default_monitor_interval_ms(),
        }
    }
}

/// Upstream account resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSection {
    #[serde(default = "default_account_url")]
    pub url: String,

    /// JSON field (or `/`-prefixed pointer) holding the id
    #[serde(default = "default_account_field")]
    pub field: String,

    #[serde(default = "default_fallback_id")]
    pub fallback_id: String,

    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_account_url() -> String {
    "http://127.0.0.1:9000/v1/account".to_string()
}

fn default_account_field() -> String {
    DEFAULT_ACCOUNT_FIELD.to_string()
}

fn default_fallback_id() -> String {
    DEFAULT_FALLBACK_ACCOUNT_ID.to_string()
}

fn default_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

impl Default for AccountSection {
    fn default() -> Self {
        Self {
            url: default_account_url(),
            field: default_account_field(),
            fallback_id: default_fallback_id(),
            attempts: default_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

/// Lifecycle timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorSection {
    /// Graceful stop bound before force-termination
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,

    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default = "default_port_release_timeout_ms")]
    pub port_release_timeout_ms: u64,
}

fn default_shutdown_timeout_ms() -> u64 {
    3_000
}

fn default_readiness_timeout_ms() -> u64 {
    10_000
}

fn default_probe_interval_ms() -> u64 {
    100
}

fn default_health_path() -> String {
    "/health".to_string()
}

fn default_port_release_timeout_ms() -> u64 {
    1_000
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            health_path: default_health_path(),
            port_release_timeout_ms: default_port_release_timeout_ms(),
        }
    }
}

/// One managed server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    /// Added to `gateway.base_port`
    pub offset: u16,
    /// `[program, args...]`
    pub command: Vec<String>,
}

impl ServerEntry {
    fn demo(name: &str, offset: u16) -> Self {
        Self {
            name: name.to_string(),
            offset,
            command: vec![
                DEMO_SERVER_PROGRAM.to_string(),
                "--role".to_string(),
                name.to_string(),
            ],
        }
    }
}

fn default_servers() -> Vec<ServerEntry> {
    vec![
        ServerEntry::demo("configuration", 1),
        ServerEntry::demo("data", 2),
        ServerEntry::demo("utilities", 3),
        ServerEntry::demo("playbook", 4),
    ]
}

// =============================================================================
// Overrides
// =============================================================================

/// Values from command-line flags or their environment variables
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub base_port: Option<u16>,
    pub account_url: Option<String>,
    pub fallback_account_id: Option<String>,
    pub account_attempts: Option<u32>,
    pub shutdown_timeout_ms: Option<u64>,
}

// =============================================================================
// Loading and validation
// =============================================================================

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, &path.display().to_string())
    }

    pub fn from_toml(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Defaults or `path`, then `overrides`, then validation
    pub fn resolve(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(port) = overrides.base_port {
            self.gateway.base_port = port;
        }
        if let Some(url) = &overrides.account_url {
            self.account.url = url.clone();
        }
        if let Some(id) = &overrides.fallback_account_id {
            self.account.fallback_id = id.clone();
        }
        if let Some(attempts) = overrides.account_attempts {
            self.account.attempts = attempts;
        }
        if let Some(ms) = overrides.shutdown_timeout_ms {
            self.supervisor.shutdown_timeout_ms = ms;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(invalid("at least one managed server is required"));
        }
        if self.gateway.base_port == 0 {
            return Err(invalid("gateway.base_port must not be 0"));
        }
        self.gateway
            .bind_address
            .parse::<IpAddr>()
            .map_err(|e| invalid(format!("gateway.bind_address: {}", e)))?;

        let mut names = HashSet::new();
        let mut offsets = HashSet::new();
        for server in &self.servers {
            validate_name(&server.name)?;
            if !names.insert(server.name.as_str()) {
                return Err(invalid(format!("duplicate server name '{}'", server.name)));
            }
            if server.offset == 0 {
                return Err(invalid(format!(
                    "server '{}' needs a non-zero offset (the base port is the gateway's)",
                    server.name
                )));
            }
            if !offsets.insert(server.offset) {
                return Err(invalid(format!(
                    "duplicate offset {} for server '{}'",
                    server.offset, server.name
                )));
            }
            if server.command.first().map_or(true, |p| p.trim().is_empty()) {
                return Err(invalid(format!("server '{}' has no command", server.name)));
            }
        }
        // Port overflow
        self.server_specs()?;

        if self.account.attempts == 0 {
            return Err(invalid("account.attempts must be at least 1"));
        }
        if self.account.fallback_id.trim().is_empty() {
            return Err(invalid("account.fallback_id must not be empty"));
        }
        url::Url::parse(&self.account.url)
            .map_err(|e| invalid(format!("account.url '{}': {}", self.account.url, e)))?;
        for (name, backend) in &self.backends {
            url::Url::parse(backend)
                .map_err(|e| invalid(format!("backends.{} '{}': {}", name, backend, e)))?;
        }
        if !self.supervisor.health_path.starts_with('/') {
            return Err(invalid("supervisor.health_path must start with '/'"));
        }

        let durations = [
            ("gateway.request_timeout_ms", self.gateway.request_timeout_ms),
            ("gateway.monitor_interval_ms", self.gateway.monitor_interval_ms),
            ("account.attempt_timeout_ms", self.account.attempt_timeout_ms),
            ("supervisor.shutdown_timeout_ms", self.supervisor.shutdown_timeout_ms),
            ("supervisor.readiness_timeout_ms", self.supervisor.readiness_timeout_ms),
            ("supervisor.probe_interval_ms", self.supervisor.probe_interval_ms),
            (
                "supervisor.port_release_timeout_ms",
                self.supervisor.port_release_timeout_ms,
            ),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, ms)| *ms == 0) {
            return Err(invalid(format!("{} must be greater than 0", field)));
        }
        Ok(())
    }

    /// Managed server specs with ports derived from the base port
    pub fn server_specs(&self) -> Result<Vec<ManagedServerSpec>, ConfigError> {
        self.servers
            .iter()
            .map(|server| {
                let entrypoint = Entrypoint::from_command(&server.command)
                    .ok_or_else(|| invalid(format!("server '{}' has no command", server.name)))?;
                ManagedServerSpec::with_offset(
                    server.name.clone(),
                    self.gateway.base_port,
                    server.offset,
                    entrypoint,
                )
                .map_err(|e| invalid(e.to_string()))
            })
            .collect()
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .gateway
            .bind_address
            .parse()
            .map_err(|e| invalid(format!("gateway.bind_address: {}", e)))?;
        Ok(SocketAddr::new(ip, self.gateway.base_port))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.gateway.monitor_interval_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.account.attempt_timeout_ms)
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            attempts: self.account.attempts,
            base_delay: Duration::from_millis(self.account.base_delay_ms),
            max_delay: Duration::from_millis(self.account.max_delay_ms),
            attempt_timeout: self.attempt_timeout(),
            fallback_id: self.account.fallback_id.clone(),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            shutdown_timeout: Duration::from_millis(self.supervisor.shutdown_timeout_ms),
            port_release_timeout: Duration::from_millis(self.supervisor.port_release_timeout_ms),
            readiness: ReadinessConfig {
                health_path: self.supervisor.health_path.clone(),
                probe_interval: Duration::from_millis(self.supervisor.probe_interval_ms),
                readiness_timeout: Duration::from_millis(self.supervisor.readiness_timeout_ms),
            },
        }
    }

    pub fn forward_config(&self) -> ForwardConfig {
        ForwardConfig {
            request_timeout: Duration::from_millis(self.gateway.request_timeout_ms),
            ..Default::default()
        }
    }

    pub fn composer(&self) -> EnvironmentComposer {
        EnvironmentComposer::new(self.backends.clone(), self.secret.clone())
    }
}

fn validate_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(invalid("server names must not be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(invalid(format!(
            "server name '{}' may only contain [a-z0-9_-]",
            name
        )));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(invalid(format!(
            "server name '{}' is reserved by the gateway",
            name
        )));
    }
    Ok(())
}
