use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::state::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();
    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
    }))
}

/// Reports presence of each required configuration value, never the value
/// itself. Open (no api key) so deploy tooling can probe it.
pub async fn env_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.settings.env_report())
}
