use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::ingest::batch::BatchProcessor;
use crate::state::AppState;
use crate::store::transcripts::TranscriptStore;

#[derive(Debug, Deserialize)]
pub struct CreateTranscriptRequest {
    pub title: String,
    pub content: Option<String>,
    pub storage_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ProcessBatchRequest {
    pub transcript_ids: Vec<String>,
    pub batch_size: Option<usize>,
    pub batch_delay_ms: Option<u64>,
    #[serde(default)]
    pub force: bool,
}

pub async fn create_transcript(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateTranscriptRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }
    if payload.content.is_none() && payload.storage_path.is_none() {
        return Err(ApiError::BadRequest(
            "either content or storage_path is required".to_string(),
        ));
    }

    let transcript = state
        .transcripts
        .create(
            payload.title.trim(),
            payload.content.as_deref(),
            payload.storage_path.as_deref(),
        )
        .await?;

    Ok(Json(json!({"transcript": transcript})))
}

pub async fn list_transcripts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    let transcripts = state.transcripts.list().await?;
    let items: Vec<serde_json::Value> = transcripts
        .iter()
        .map(|t| {
            json!({
                "id": t.id,
                "title": t.title,
                "status": TranscriptStore::effective_status(t, state.settings.stuck_after_secs),
                "storage_path": t.storage_path,
                "metadata": t.metadata,
                "created_at": t.created_at,
                "updated_at": t.updated_at,
            })
        })
        .collect();

    Ok(Json(json!({"transcripts": items})))
}

pub async fn get_transcript(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    let transcript = state
        .transcripts
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Transcript not found".to_string()))?;
    let chunk_count = state.chunks.count(Some(&id)).await?;

    Ok(Json(json!({
        "transcript": transcript,
        "effective_status":
            TranscriptStore::effective_status(&transcript, state.settings.stuck_after_secs),
        "chunk_count": chunk_count,
    })))
}

pub async fn process_transcript(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Option<Json<ProcessRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    let force = payload.map(|Json(p)| p.force).unwrap_or(false);
    let outcome = state.processor.process(&id, force).await?;
    Ok(Json(json!({"outcome": outcome})))
}

/// Partial failure is data, not an error: the response carries counts plus an
/// error list and always comes back 200.
pub async fn process_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<ProcessBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    if payload.transcript_ids.is_empty() {
        return Err(ApiError::BadRequest(
            "transcript_ids must not be empty".to_string(),
        ));
    }

    let config = state.batch_config(payload.batch_size, payload.batch_delay_ms);
    let batch = BatchProcessor::new(state.processor.clone(), config);
    let outcome = batch.run(&payload.transcript_ids, payload.force).await;

    Ok(Json(json!({
        "total": outcome.total(),
        "succeeded": outcome.succeeded.len(),
        "failed": outcome.failed.len(),
        "errors": outcome.failed,
        "succeeded_ids": outcome.succeeded,
    })))
}

pub async fn summarize_transcript(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    let summary = state.processor.summarize(&id).await?;
    Ok(Json(json!({"summary": summary})))
}

/// Maintenance: strip the redundant storage path prefix from legacy rows.
/// Safe to run repeatedly.
pub async fn fix_storage_paths(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    let fixed = state.transcripts.fix_storage_paths().await?;
    Ok(Json(json!({"fixed": fixed})))
}
