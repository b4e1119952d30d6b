//! Aggregate status of the account resolver and managed servers

use std::sync::Arc;

use chrono::{DateTime, Utc};
use querygate_account::AccountState;
use querygate_core::{mask_account_id, ManagedServerState, ServerStatus};
use querygate_supervisor::ServerSupervisor;
use serde::Serialize;

/// Overall verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Overall {
    Healthy,
    Degraded,
}

/// Resolver part of the status document; the account id is masked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolverStatus {
    pub account_id: String,
    pub degraded: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

/// Status document served on `/status`
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub overall: Overall,
    pub resolver: ResolverStatus,
    pub servers: Vec<ManagedServerState>,
}

/// Read-only view over the supervisor and the account holder
#[derive(Clone)]
pub struct HealthReporter {
    supervisor: Arc<ServerSupervisor>,
    accounts: Arc<AccountState>,
}

impl HealthReporter {
    pub fn new(supervisor: Arc<ServerSupervisor>, accounts: Arc<AccountState>) -> Self {
        Self {
            supervisor,
            accounts,
        }
    }

    /// Current status. Degraded when the account came from the fallback,
    /// nothing has been resolved yet, or any server is not running.
    pub fn status(&self) -> HealthStatus {
        let resolver = match self.accounts.current() {
            Some(account) => ResolverStatus {
                account_id: account.masked_id(),
                degraded: account.degraded,
                resolved_at: Some(account.resolved_at),
                attempts: account.attempts,
            },
            None => ResolverStatus {
                account_id: mask_account_id(""),
                degraded: true,
                resolved_at: None,
                attempts: 0,
            },
        };

        let servers = self.supervisor.snapshot();
        let all_running = servers.iter().all(|s| s.status == ServerStatus::Running);
        let overall = if resolver.degraded || !all_running {
            Overall::Degraded
        } else {
            Overall::Healthy
        };

        HealthStatus {
            overall,
            resolver,
            servers,
        }
    }
}
