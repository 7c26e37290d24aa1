pub mod gemini;
pub mod hash_embed;
pub mod speech;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Seam over the generative backend. One implementation talks to the
/// Generative Language API; tests use the deterministic hash embedder.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name ("gemini", ...), recorded as the message source tag.
    fn name(&self) -> &str;

    /// Chat completion, non-streaming.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ApiError>;

    /// Embeddings, one vector per input.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError>;
}
