//! WebSocket endpoint.

use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tracing::info;

use crate::session;
use crate::state::AppState;

/// Upgrade handler for the processing endpoint.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("client connecting");
    ws.max_message_size(state.config.ws_max_frame_bytes)
        .on_upgrade(|socket| session::run(socket, state))
}
