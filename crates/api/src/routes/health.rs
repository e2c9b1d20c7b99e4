//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::load_balancers::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Provider types with a registered backend.
    pub providers: Vec<String>,
    /// Load balancers whose queue worker is currently alive.
    pub active_chains: usize,
}

/// GET /health
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let manager = &state.manager;
    Json(HealthResponse {
        status: "ok",
        providers: manager.services().backends.provider_types(),
        active_chains: manager.queue().active_chains(),
    })
}
