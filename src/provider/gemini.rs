//! Generative Language API client (generateContent / embedContent).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{ChatMessage, ModelProvider};
use crate::core::errors::ApiError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone)]
pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new(api_key: String, chat_model: String, embedding_model: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            chat_model,
            embedding_model,
            client: Client::new(),
        }
    }

    #[allow(dead_code)]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// The API has no system role; system messages fold into a
    /// `systemInstruction` block and the rest map user/assistant → user/model.
    fn build_generate_body(messages: &[ChatMessage]) -> Value {
        let mut system_parts: Vec<Value> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for msg in messages {
            match msg.role.as_str() {
                "system" => system_parts.push(json!({"text": msg.content})),
                "assistant" => contents.push(json!({
                    "role": "model",
                    "parts": [{"text": msg.content}],
                })),
                _ => contents.push(json!({
                    "role": "user",
                    "parts": [{"text": msg.content}],
                })),
            }
        }

        let mut body = json!({ "contents": contents });
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({"parts": system_parts});
        }
        body
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, ApiError> {
        let res = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(ApiError::upstream)?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            let message = extract_provider_error(&text)
                .unwrap_or_else(|| format!("provider returned {status}"));
            return Err(ApiError::Upstream(message));
        }

        res.json().await.map_err(ApiError::upstream)
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ApiError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.chat_model
        );
        let body = Self::build_generate_body(messages);
        let payload = self.post_json(&url, &body).await?;

        let content = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        if content.is_empty() {
            return Err(ApiError::Upstream(
                "provider returned no candidates".to_string(),
            ));
        }
        Ok(content)
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/models/{}:batchEmbedContents",
            self.base_url, self.embedding_model
        );
        let requests: Vec<Value> = inputs
            .iter()
            .map(|text| {
                json!({
                    "model": format!("models/{}", self.embedding_model),
                    "content": {"parts": [{"text": text}]},
                })
            })
            .collect();

        let payload = self
            .post_json(&url, &json!({ "requests": requests }))
            .await?;

        let embeddings = payload["embeddings"]
            .as_array()
            .ok_or_else(|| ApiError::Upstream("malformed embedding response".to_string()))?;

        let mut vectors = Vec::with_capacity(embeddings.len());
        for entry in embeddings {
            let values = entry["values"]
                .as_array()
                .ok_or_else(|| ApiError::Upstream("malformed embedding entry".to_string()))?;
            vectors.push(
                values
                    .iter()
                    .filter_map(|v| v.as_f64())
                    .map(|v| v as f32)
                    .collect(),
            );
        }

        if vectors.len() != inputs.len() {
            return Err(ApiError::Upstream(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

/// Pulls the human-readable message out of a Google error payload so the
/// caller sees the provider's own words.
fn extract_provider_error(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_fold_into_instruction_block() {
        let messages = vec![
            ChatMessage::system("you are an analyst"),
            ChatMessage::user("what happened?"),
        ];
        let body = GeminiProvider::build_generate_body(&messages);

        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "you are an analyst"
        );
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["contents"][0]["role"], "user");
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let messages = vec![ChatMessage {
            role: "assistant".to_string(),
            content: "prior answer".to_string(),
        }];
        let body = GeminiProvider::build_generate_body(&messages);
        assert_eq!(body["contents"][0]["role"], "model");
    }

    #[test]
    fn provider_error_message_is_extracted() {
        let body = r#"{"error": {"code": 429, "message": "Resource exhausted"}}"#;
        assert_eq!(
            extract_provider_error(body).as_deref(),
            Some("Resource exhausted")
        );
        assert!(extract_provider_error("not json").is_none());
    }
}
