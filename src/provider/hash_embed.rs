//! Deterministic offline provider.
//!
//! Used when no model API key is configured, and by tests. Embeddings are
//! hashed bag-of-words vectors: each word hashes (sha2) into a bucket of a
//! fixed-dimension vector, then the vector is L2-normalized. Texts sharing
//! vocabulary land close together, which is enough for retrieval plumbing to
//! behave meaningfully without a network call.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{ChatMessage, ModelProvider};
use crate::core::errors::ApiError;

const DIMENSIONS: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }

    fn embed_one(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIMENSIONS];

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u16::from_le_bytes([digest[0], digest[1]]) as usize % DIMENSIONS;
            // Sign bit from the hash keeps buckets from only accumulating.
            let sign = if digest[2] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl ModelProvider for HashEmbedder {
    fn name(&self) -> &str {
        "offline"
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ApiError> {
        // Degraded mode: no generation available, but the pipeline still
        // produces a non-empty answer.
        let question = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(format!(
            "No model API key is configured, so this answer was generated offline. \
             Your question was: {question}"
        ))
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        Ok(inputs.iter().map(|text| Self::embed_one(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::chunks::ChunkStore;

    #[tokio::test]
    async fn embeddings_are_deterministic_and_normalized() {
        let provider = HashEmbedder::new();
        let a = provider.embed(&["the budget meeting".to_string()]).await.unwrap();
        let b = provider.embed(&["the budget meeting".to_string()]).await.unwrap();
        assert_eq!(a, b);

        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let provider = HashEmbedder::new();
        let vectors = provider
            .embed(&[
                "quarterly revenue and churn numbers".to_string(),
                "quarterly revenue discussion".to_string(),
                "completely unrelated picnic planning".to_string(),
            ])
            .await
            .unwrap();

        let close = ChunkStore::cosine_similarity(&vectors[0], &vectors[1]);
        let far = ChunkStore::cosine_similarity(&vectors[0], &vectors[2]);
        assert!(close > far);
    }

    #[tokio::test]
    async fn chat_answer_is_never_empty() {
        let provider = HashEmbedder::new();
        let answer = provider
            .chat(&[ChatMessage::user("what was decided?")])
            .await
            .unwrap();
        assert!(!answer.is_empty());
        assert!(answer.contains("what was decided?"));
    }
}
