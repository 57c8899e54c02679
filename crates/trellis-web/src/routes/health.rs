use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = if state.hub.is_closed() { "closing" } else { "ok" };
    Json(HealthResponse {
        status,
        connections: state.hub.connection_count().await,
    })
}
