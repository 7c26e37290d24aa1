use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::core::security::require_api_key;
use crate::state::AppState;

fn default_language() -> String {
    "en-US".to_string()
}

fn default_voice() -> String {
    "en-US-Neural2-C".to_string()
}

#[derive(Debug, Deserialize)]
pub struct SpeechToTextRequest {
    /// base64-encoded audio.
    pub audio: String,
    #[serde(default = "default_language")]
    pub language_code: String,
}

#[derive(Debug, Deserialize)]
pub struct TextToSpeechRequest {
    pub text: String,
    #[serde(default = "default_voice")]
    pub voice_name: String,
    #[serde(default = "default_language")]
    pub language_code: String,
}

pub async fn speech_to_text(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<SpeechToTextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    if payload.audio.trim().is_empty() {
        return Err(ApiError::BadRequest("audio is required".to_string()));
    }

    let transcript = state
        .speech
        .speech_to_text(&payload.audio, &payload.language_code)
        .await?;
    Ok(Json(json!({"transcript": transcript})))
}

pub async fn text_to_speech(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<TextToSpeechRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_api_key(&headers, &state.session_token)?;

    if payload.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text is required".to_string()));
    }

    let audio = state
        .speech
        .text_to_speech(&payload.text, &payload.voice_name, &payload.language_code)
        .await?;
    Ok(Json(json!({"audio_base64": audio})))
}
