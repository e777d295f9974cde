// =============================================================================
// API layer — REST, WebSocket, admin, and auth
// =============================================================================

pub mod admin;
pub mod auth;
pub mod rest;
pub mod ws;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

/// Assemble the full router: the REST/admin sub-routers plus the websocket
/// upgrade endpoint, all sharing one `Arc<AppState>`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(rest::router())
        .merge(admin::router())
        .route("/scanner/ws", get(ws::ws_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}
