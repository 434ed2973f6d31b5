//! Router construction.

use axum::routing::get;
use axum::Router;

use crate::health::healthz;
use crate::state::AppState;
use crate::ws::ws_handler;

/// The WebSocket router served on the main port.
pub fn create_router(state: AppState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

/// The health probe router served on the health port.
pub fn health_router(state: AppState) -> Router {
    Router::new().route("/healthz", get(healthz)).with_state(state)
}
