//! Admin handlers

use axum::extract::{Path, Query, State};
use axum::Json;
use querygate_core::ServerStatus;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RestartParams {
    /// Resolve the account again and restart with a fresh bundle
    #[serde(default)]
    pub reresolve: bool,
}

#[derive(Debug, Serialize)]
pub struct RestartResponse {
    pub server: String,
    pub status: ServerStatus,
    pub restarts: u32,
    pub account_degraded: bool,
}

/// POST /admin/servers/{name}/restart
///
/// 404 for an unknown server, 409 while a restart of the same server is in
/// flight. Other servers keep serving throughout.
pub async fn restart_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<RestartParams>,
) -> Result<Json<RestartResponse>, ApiError> {
    let before = state
        .supervisor()
        .state(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown server: {}", name)))?;
    if before.restart_in_progress {
        return Err(ApiError::Conflict(format!(
            "Restart already in progress for '{}'",
            name
        )));
    }

    info!(server = %name, reresolve = params.reresolve, "Restart requested");
    let bundle = if params.reresolve {
        Some(state.reresolve().await?)
    } else {
        None
    };

    state.supervisor().restart_with(&name, bundle).await?;

    let after = state
        .supervisor()
        .state(&name)
        .ok_or_else(|| ApiError::Internal(format!("Server '{}' vanished", name)))?;
    Ok(Json(RestartResponse {
        server: after.name,
        status: after.status,
        restarts: after.restarts,
        account_degraded: state.accounts().is_degraded(),
    }))
}
