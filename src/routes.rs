use axum::Router;

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the axum Router for the notification core.
///
/// Task CRUD, auth, and persistence routes belong to the surrounding
/// service; this router carries only the realtime surface.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (identity resolved upstream, passed via query param)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new().merge(ws_routes).merge(health).with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
