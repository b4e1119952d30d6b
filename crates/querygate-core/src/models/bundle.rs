//! Per-process environment bundle

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ManagedServerSpec, ResolvedAccount};

/// Prefix of every variable injected into a managed server
pub const ENV_PREFIX: &str = "QUERYGATE_";

/// Pointer to an externally supplied credential.
///
/// Only the provider and parameter name travel to managed servers; the
/// secret value itself is fetched by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Where the secret lives (e.g. "env", "aws-ssm")
    pub provider: String,
    /// Parameter name within the provider
    pub parameter: String,
}

impl Default for SecretRef {
    fn default() -> Self {
        Self {
            provider: "env".to_string(),
            parameter: "QUERYGATE_API_TOKEN".to_string(),
        }
    }
}

/// Configuration snapshot handed to each managed server at start time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentBundle {
    pub account: ResolvedAccount,
    pub console_name: String,
    /// Logical backend name to base URL
    pub backend_urls: BTreeMap<String, String>,
    pub secret: SecretRef,
}

impl EnvironmentBundle {
    /// Render the bundle as the launch environment for `spec`
    pub fn to_env(&self, spec: &ManagedServerSpec) -> Vec<(String, String)> {
        let mut vars = vec![
            (env_key("SERVER_NAME"), spec.name.clone()),
            (env_key("PORT"), spec.port.to_string()),
            (env_key("ACCOUNT_ID"), self.account.account_id.clone()),
            (
                env_key("ACCOUNT_DEGRADED"),
                self.account.degraded.to_string(),
            ),
            (env_key("CONSOLE"), self.console_name.clone()),
            (env_key("SECRET_PROVIDER"), self.secret.provider.clone()),
            (env_key("SECRET_PARAMETER"), self.secret.parameter.clone()),
        ];
        for (name, url) in &self.backend_urls {
            vars.push((backend_env_key(name), url.clone()));
        }
        vars
    }
}

fn env_key(suffix: &str) -> String {
    format!("{}{}", ENV_PREFIX, suffix)
}

/// `QUERYGATE_BACKEND_<NAME>_URL`, upper-cased with `-` folded to `_`
pub fn backend_env_key(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    env_key(&format!("BACKEND_{}_URL", name))
}
