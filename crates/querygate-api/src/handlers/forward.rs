//! Forwarding handler for `/{server}/{*path}`

use axum::extract::{Request, State};
use axum::response::Response;
use querygate_core::{GatewayError, ServerStatus};
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// Any method on any path not claimed by the gateway's own routes.
///
/// The raw, still percent-encoded path is validated before the supervisor
/// is consulted; only `Running` servers are forwarded to.
pub async fn forward(State(state): State<AppState>, req: Request) -> Result<Response, ApiError> {
    let path = req.uri().path().to_string();
    let route = state.routes().resolve(&path)?;

    match state.supervisor().status(route.server) {
        Some(ServerStatus::Running) => {}
        Some(status) => {
            return Err(GatewayError::ServerUnavailable {
                name: route.server.to_string(),
                status,
            }
            .into())
        }
        None => return Err(GatewayError::UnknownServer(route.server.to_string()).into()),
    }

    let method = req.method().clone();
    let response = state
        .forwarder()
        .forward(route.port, &route.forward_path, req)
        .await?;

    debug!(
        server = %route.server,
        %method,
        path = %route.forward_path,
        status = response.status().as_u16(),
        "Forwarded"
    );
    Ok(response)
}
