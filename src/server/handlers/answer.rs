use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::{caller_user_id, require_api_key};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    /// Restrict retrieval to one transcript.
    pub transcript_id: Option<String>,
    /// When present the exchange is recorded in this conversation (created
    /// fresh when "new" semantics are wanted: omit the id and set `chat`).
    pub conversation_id: Option<String>,
    /// Record the exchange in conversation history.
    #[serde(default)]
    pub chat: bool,
}

/// The answer function. Unauthenticated callers are rejected by
/// `require_api_key` before any retrieval happens.
pub async fn answer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<AnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    if payload.chat || payload.conversation_id.is_some() {
        let user_id = caller_user_id(&headers);
        let outcome = state
            .chat
            .send(
                &user_id,
                payload.conversation_id.as_deref(),
                &payload.question,
                payload.transcript_id.as_deref(),
            )
            .await?;
        return Ok(Json(json!({
            "conversation": outcome.conversation,
            "assistant_message_id": outcome.assistant_message_id,
            "response": outcome.response,
            "error": outcome.error,
        })));
    }

    let response = state
        .composer
        .answer(&payload.question, payload.transcript_id.as_deref())
        .await?;
    Ok(Json(json!({"response": response})))
}
