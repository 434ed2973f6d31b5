//! Health probe endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub jobs: JobStats,
}

#[derive(Debug, Serialize)]
pub struct JobStats {
    pub total: u64,
    pub active: usize,
    pub queued: usize,
    pub max_concurrent: usize,
}

/// `GET /healthz`: liveness plus queue statistics.
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.manager.stats();
    Json(HealthResponse {
        status: "ok",
        jobs: JobStats {
            total: stats.total,
            active: stats.active,
            queued: stats.queued,
            max_concurrent: stats.max_concurrent,
        },
    })
}
