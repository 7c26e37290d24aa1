//! Answer composer: retrieval → prompt → model → answer with citations and a
//! "percentage from transcripts" indicator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::core::errors::ApiError;
use crate::provider::{ChatMessage, ModelProvider};
use crate::rag::context::{build_context, distinct_sources};
use crate::rag::retrieval::{Retriever, SearchRequest};

const GROUNDED_PROMPT: &str = "You are an AI analyst answering questions about \
meeting transcripts. Ground your answer in the context below. When the context \
does not cover the question, say so before falling back to general knowledge.";

const GENERAL_PROMPT: &str = "You are an AI analyst. No transcript context \
matched this question; answer from general knowledge and say that no \
transcript data was used.";

#[derive(Debug, Clone)]
pub struct AnswerConfig {
    pub match_count: usize,
    pub similarity_threshold: f32,
    pub max_context_chars: usize,
    pub timeout: Duration,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            match_count: 5,
            similarity_threshold: 0.3,
            max_context_chars: 6000,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerResponse {
    pub answer: String,
    /// Distinct transcript titles the context came from.
    pub sources: Vec<String>,
    /// Heuristic share of the answer traceable to retrieved context, 0-100.
    pub rag_percentage: u8,
    pub latency_ms: u64,
    /// Model tag recorded on the assistant message ("gemini", "offline").
    pub source_tag: String,
}

#[derive(Clone)]
pub struct AnswerComposer {
    retriever: Retriever,
    provider: Arc<dyn ModelProvider>,
    config: AnswerConfig,
}

impl AnswerComposer {
    pub fn new(retriever: Retriever, provider: Arc<dyn ModelProvider>, config: AnswerConfig) -> Self {
        Self {
            retriever,
            provider,
            config,
        }
    }

    /// Auth is the handler's job; by the time this runs the caller is known.
    pub async fn answer(
        &self,
        question: &str,
        transcript_id: Option<&str>,
    ) -> Result<AnswerResponse, ApiError> {
        if question.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "question must not be empty".to_string(),
            ));
        }

        let started = Instant::now();

        let retrieved = self
            .retriever
            .search(&SearchRequest {
                query: question.to_string(),
                transcript_id: transcript_id.map(str::to_string),
                match_count: self.config.match_count,
                similarity_threshold: self.config.similarity_threshold,
                hybrid: true,
                use_feedback: true,
            })
            .await?;

        let (messages, sources, context) = if retrieved.is_empty() {
            (
                vec![
                    ChatMessage::system(GENERAL_PROMPT),
                    ChatMessage::user(question),
                ],
                Vec::new(),
                String::new(),
            )
        } else {
            let context = build_context(&retrieved, self.config.max_context_chars);
            let sources = distinct_sources(&retrieved);
            let user = format!("Context:\n{context}\n\nQuestion: {question}");
            (
                vec![ChatMessage::system(GROUNDED_PROMPT), ChatMessage::user(user)],
                sources,
                context,
            )
        };

        let answer = tokio::time::timeout(self.config.timeout, self.provider.chat(&messages))
            .await
            .map_err(|_| {
                ApiError::Upstream(format!(
                    "model call exceeded {}s timeout",
                    self.config.timeout.as_secs()
                ))
            })??;

        let rag_percentage = if retrieved.is_empty() {
            0
        } else {
            transcript_percentage(&answer, &context)
        };

        Ok(AnswerResponse {
            answer,
            sources,
            rag_percentage,
            latency_ms: started.elapsed().as_millis() as u64,
            source_tag: self.provider.name().to_string(),
        })
    }
}

/// Placeholder scoring function: the share of answer sentences whose
/// significant words mostly (>= half) appear in the retrieved context.
/// Deliberately heuristic; the only hard guarantee is 0 with no retrieval.
fn transcript_percentage(answer: &str, context: &str) -> u8 {
    let context_words: HashSet<String> = significant_words(context).collect();
    if context_words.is_empty() {
        return 0;
    }

    let sentences: Vec<&str> = answer
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        return 0;
    }

    let grounded = sentences
        .iter()
        .filter(|sentence| {
            let words: Vec<String> = significant_words(sentence).collect();
            if words.is_empty() {
                return false;
            }
            let hits = words.iter().filter(|w| context_words.contains(*w)).count();
            hits * 2 >= words.len()
        })
        .count();

    ((grounded * 100) / sentences.len()).min(100) as u8
}

fn significant_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
}
