use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::{caller_user_id, require_api_key};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameConversationRequest {
    pub title: String,
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let user_id = caller_user_id(&headers);

    let conversations = state.history.list_conversations(&user_id).await?;
    Ok(Json(json!({"conversations": conversations})))
}

pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let user_id = caller_user_id(&headers);

    let conversation = state
        .history
        .create_conversation(&user_id, payload.title)
        .await?;
    Ok(Json(json!({"conversation": conversation})))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let user_id = caller_user_id(&headers);

    let conversation = state
        .history
        .get_conversation(&user_id, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?;

    Ok(Json(json!({"conversation": conversation})))
}

pub async fn rename_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<RenameConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let user_id = caller_user_id(&headers);

    state
        .history
        .rename_conversation(&user_id, &id, payload.title.trim())
        .await?;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let user_id = caller_user_id(&headers);

    state.history.delete_conversation(&user_id, &id).await?;
    Ok(Json(json!({"status": "deleted"})))
}

pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;
    let user_id = caller_user_id(&headers);

    let limit = params
        .get("limit")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(200);

    let messages = state.history.list_messages(&user_id, &id, limit).await?;
    Ok(Json(json!({"messages": messages})))
}
