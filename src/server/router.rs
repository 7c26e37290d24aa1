use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{answer, conversations, health, search, speech, transcripts};
use crate::server::ws::ws_handler;
use crate::state::AppState;

/// Builds the application router: health/env probes, transcript lifecycle,
/// retrieval + answer, conversation history, speech pass-through and the
/// realtime socket, behind CORS and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/env-check", get(health::env_check))
        .route(
            "/api/transcripts",
            get(transcripts::list_transcripts).post(transcripts::create_transcript),
        )
        .route("/api/transcripts/fix-paths", post(transcripts::fix_storage_paths))
        .route(
            "/api/transcripts/process-batch",
            post(transcripts::process_batch),
        )
        .route("/api/transcripts/:id", get(transcripts::get_transcript))
        .route(
            "/api/transcripts/:id/process",
            post(transcripts::process_transcript),
        )
        .route(
            "/api/transcripts/:id/summary",
            post(transcripts::summarize_transcript),
        )
        .route("/api/search", post(search::search))
        .route("/api/feedback", post(search::record_feedback))
        .route("/api/answer", post(answer::answer))
        .route("/api/speech-to-text", post(speech::speech_to_text))
        .route("/api/text-to-speech", post(speech::text_to_speech))
        .route(
            "/api/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/api/conversations/:id",
            get(conversations::get_conversation)
                .patch(conversations::rename_conversation)
                .delete(conversations::delete_conversation),
        )
        .route(
            "/api/conversations/:id/messages",
            get(conversations::get_messages),
        )
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
}

fn build_cors_layer() -> CorsLayer {
    let origins: Vec<HeaderValue> = default_local_origins()
        .into_iter()
        .filter_map(|origin| HeaderValue::from_str(&origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
            header::HeaderName::from_static("x-user-id"),
        ])
}

fn default_local_origins() -> Vec<String> {
    vec![
        "http://localhost".to_string(),
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://127.0.0.1".to_string(),
        "http://127.0.0.1:3000".to_string(),
        "http://127.0.0.1:5173".to_string(),
    ]
}
