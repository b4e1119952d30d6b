//! querygate-api - Public HTTP surface of the gateway
//!
//! The router owns three paths itself and forwards everything else:
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /health` | gateway liveness |
//! | `GET /status` | aggregate status from the [`HealthReporter`] |
//! | `POST /admin/servers/{name}/restart` | restart one managed server |
//! | `/{server}/{*path}` | forwarded to the managed server named by the first segment |
//!
//! # Usage
//!
//! ```ignore
//! use querygate_api::{create_router, AppState, ForwardConfig};
//!
//! let state = AppState::new(supervisor, accounts, composer, ForwardConfig::default())?;
//! let router = create_router(state);
//! axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! ```

pub mod error;
pub mod handlers;
pub mod health;
pub mod proxy;
pub mod state;

pub use error::ApiError;
pub use health::{HealthReporter, HealthStatus, Overall, ResolverStatus};
pub use proxy::{ForwardConfig, Forwarder};
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the gateway router with the given application state
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Aggregate status
        .route("/status", get(handlers::status::get_status))
        // Admin routes
        .route(
            "/admin/servers/{name}/restart",
            post(handlers::admin::restart_server),
        )
        // CORS only for the gateway's own routes; forwarded traffic is untouched
        .route_layer(cors)
        // Everything else goes to a managed server
        .fallback(handlers::forward::forward)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
