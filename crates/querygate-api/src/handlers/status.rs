//! Status document handler

use axum::extract::State;
use axum::Json;

use crate::health::HealthStatus;
use crate::state::AppState;

/// GET /status
///
/// Always 200; the verdict is in `overall`.
pub async fn get_status(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(state.health().status())
}
