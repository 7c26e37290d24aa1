use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::rag::retrieval::SearchRequest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub chunk_id: String,
    pub helpful: bool,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    let results = state.retriever.search(&payload).await?;
    Ok(Json(json!({
        "count": results.len(),
        "results": results,
    })))
}

/// Feedback votes feed the retrieval weighting when `use_feedback` is set.
pub async fn record_feedback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<FeedbackRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    state
        .chunks
        .record_feedback(&payload.chunk_id, payload.helpful)
        .await?;
    Ok(Json(json!({"status": "recorded"})))
}
