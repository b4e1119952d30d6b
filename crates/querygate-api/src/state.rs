//! Application state for the gateway API

use std::sync::Arc;

use querygate_account::{AccountResolver, AccountState};
use querygate_core::{EnvironmentBundle, EnvironmentComposer, GatewayResult, RouteTable};
use querygate_supervisor::ServerSupervisor;
use tracing::debug;

use crate::error::ApiError;
use crate::health::HealthReporter;
use crate::proxy::{ForwardConfig, Forwarder};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    supervisor: Arc<ServerSupervisor>,
    /// Built once from the supervisor's specs, never changed afterwards
    routes: Arc<RouteTable>,
    forwarder: Arc<Forwarder>,
    health: HealthReporter,
    accounts: Arc<AccountState>,
    composer: Arc<EnvironmentComposer>,
    /// Needed only for `?reresolve=true` restarts
    resolver: Option<Arc<AccountResolver>>,
}

impl AppState {
    pub fn new(
        supervisor: Arc<ServerSupervisor>,
        accounts: Arc<AccountState>,
        composer: Arc<EnvironmentComposer>,
        forward: ForwardConfig,
    ) -> GatewayResult<Self> {
        let routes = RouteTable::new(&supervisor.specs());
        Ok(Self {
            health: HealthReporter::new(supervisor.clone(), accounts.clone()),
            forwarder: Arc::new(Forwarder::new(forward)?),
            routes: Arc::new(routes),
            supervisor,
            accounts,
            composer,
            resolver: None,
        })
    }

    /// Enable account re-resolution on restart
    pub fn with_resolver(mut self, resolver: Arc<AccountResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn supervisor(&self) -> &Arc<ServerSupervisor> {
        &self.supervisor
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    pub fn health(&self) -> &HealthReporter {
        &self.health
    }

    pub fn accounts(&self) -> &Arc<AccountState> {
        &self.accounts
    }

    /// Run account resolution again and build the bundle for a restart.
    ///
    /// A degraded result never replaces a recorded account, so the bundle
    /// is composed from whatever the holder keeps afterwards.
    pub async fn reresolve(&self) -> Result<EnvironmentBundle, ApiError> {
        let resolver = self.resolver.as_ref().ok_or_else(|| {
            ApiError::BadRequest("Account re-resolution is not configured".to_string())
        })?;

        let candidate = resolver.resolve().await;
        let attempts = candidate.attempts;
        let replaced = self.accounts.accept(candidate);
        debug!(attempts, replaced, "Account re-resolution finished");

        let account = self.accounts.current().ok_or_else(|| {
            ApiError::ServiceUnavailable("No account has been resolved".to_string())
        })?;
        Ok(self.composer.compose(&account))
    }
}
