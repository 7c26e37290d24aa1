//! Chat flow: the persistence-level counterpart of the chat window.
//!
//! On send: append the user message, append a pending assistant placeholder,
//! run the answer composer, then resolve the placeholder with the reply or a
//! user-visible error message. The message list never keeps a dangling
//! placeholder once the request settles, and a failed answer is surfaced in
//! the conversation rather than dropped.

use serde::Serialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::rag::answer::{AnswerComposer, AnswerResponse};
use crate::realtime::{self, RealtimeBus};
use crate::store::history::{Conversation, HistoryStore, MessageRole};

const PENDING_PLACEHOLDER: &str = "…";
const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub conversation: Conversation,
    pub user_message_id: i64,
    pub assistant_message_id: i64,
    /// Present when the model answered.
    pub response: Option<AnswerResponse>,
    /// Present when the answer failed; the same text now sits in the
    /// resolved assistant message.
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ChatService {
    history: HistoryStore,
    composer: AnswerComposer,
    bus: RealtimeBus,
}

impl ChatService {
    pub fn new(history: HistoryStore, composer: AnswerComposer, bus: RealtimeBus) -> Self {
        Self {
            history,
            composer,
            bus,
        }
    }

    pub async fn send(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        question: &str,
        transcript_id: Option<&str>,
    ) -> Result<ChatOutcome, ApiError> {
        if question.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "message must not be empty".to_string(),
            ));
        }

        let conversation = match conversation_id {
            Some(id) => self
                .history
                .get_conversation(user_id, id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Conversation not found".to_string()))?,
            None => {
                let conversation = self
                    .history
                    .create_conversation(user_id, Some(title_from(question)))
                    .await?;
                self.bus.publish(
                    realtime::conversations_channel(user_id),
                    "conversation_created",
                    json!({"id": conversation.id, "title": conversation.title}),
                );
                conversation
            }
        };

        let user_message_id = self
            .history
            .append_message(
                &conversation.id,
                user_id,
                MessageRole::User,
                question,
                None,
                &[],
                false,
            )
            .await?;
        self.publish_message(user_id, &conversation.id, user_message_id, "message_added");

        let assistant_message_id = self
            .history
            .append_message(
                &conversation.id,
                user_id,
                MessageRole::Assistant,
                PENDING_PLACEHOLDER,
                None,
                &[],
                true,
            )
            .await?;
        self.publish_message(
            user_id,
            &conversation.id,
            assistant_message_id,
            "message_pending",
        );

        let (response, error) = match self.composer.answer(question, transcript_id).await {
            Ok(response) => {
                self.history
                    .resolve_pending(
                        assistant_message_id,
                        &response.answer,
                        Some(&response.source_tag),
                        &response.sources,
                    )
                    .await?;
                (Some(response), None)
            }
            Err(err) => {
                let visible = format!("Sorry, I couldn't generate an answer: {err}");
                self.history
                    .resolve_pending(assistant_message_id, &visible, None, &[])
                    .await?;
                tracing::warn!(
                    "Answer failed for conversation {}: {}",
                    conversation.id,
                    err
                );
                (None, Some(visible))
            }
        };
        self.publish_message(
            user_id,
            &conversation.id,
            assistant_message_id,
            "message_resolved",
        );

        // Re-read so message_count and updated_at reflect this exchange.
        let conversation = self
            .history
            .get_conversation(user_id, &conversation.id)
            .await?
            .ok_or_else(|| ApiError::Internal("conversation vanished mid-send".to_string()))?;

        Ok(ChatOutcome {
            conversation,
            user_message_id,
            assistant_message_id,
            response,
            error,
        })
    }

    fn publish_message(&self, user_id: &str, conversation_id: &str, message_id: i64, event: &str) {
        self.bus.publish(
            realtime::messages_channel(user_id, conversation_id),
            event,
            json!({"message_id": message_id, "conversation_id": conversation_id}),
        );
    }
}

fn title_from(question: &str) -> String {
    let trimmed = question.trim();
    if trimmed.chars().count() <= TITLE_MAX_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::provider::hash_embed::HashEmbedder;
    use crate::rag::answer::AnswerConfig;
    use crate::rag::retrieval::Retriever;
    use crate::store::chunks::ChunkStore;

    async fn test_chat() -> (ChatService, HistoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::store::open_pool(&dir.path().join("test.db"))
            .await
            .unwrap();
        // transcripts table exists so the chunks FK resolves.
        let _ = crate::store::transcripts::TranscriptStore::new(pool.clone())
            .await
            .unwrap();
        let history = HistoryStore::new(pool.clone()).await.unwrap();
        let chunks = ChunkStore::new(pool).await.unwrap();
        let provider = Arc::new(HashEmbedder::new());
        let composer = AnswerComposer::new(
            Retriever::new(chunks, provider.clone()),
            provider,
            AnswerConfig::default(),
        );
        let chat = ChatService::new(history.clone(), composer, RealtimeBus::new());
        (chat, history, dir)
    }

    #[tokio::test]
    async fn first_message_creates_a_titled_conversation() {
        let (chat, history, _dir) = test_chat().await;

        let outcome = chat
            .send("u1", None, "what were the key decisions?", None)
            .await
            .unwrap();

        assert_eq!(
            outcome.conversation.title.as_deref(),
            Some("what were the key decisions?")
        );
        let listed = history.list_conversations("u1").await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn placeholder_is_resolved_not_left_pending() {
        let (chat, history, _dir) = test_chat().await;

        let outcome = chat.send("u1", None, "summarize the meeting", None).await.unwrap();
        let messages = history
            .list_messages("u1", &outcome.conversation.id, 10)
            .await
            .unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert!(!messages[1].pending);
        assert_ne!(messages[1].content, PENDING_PLACEHOLDER);
        assert!(outcome.response.is_some());
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn second_message_reuses_the_conversation() {
        let (chat, history, _dir) = test_chat().await;

        let first = chat.send("u1", None, "first question", None).await.unwrap();
        let second = chat
            .send("u1", Some(&first.conversation.id), "second question", None)
            .await
            .unwrap();

        assert_eq!(first.conversation.id, second.conversation.id);
        let messages = history
            .list_messages("u1", &first.conversation.id, 10)
            .await
            .unwrap();
        assert_eq!(messages.len(), 4);
    }

    #[tokio::test]
    async fn foreign_conversation_is_rejected_before_any_write() {
        let (chat, history, _dir) = test_chat().await;
        let conv = history.create_conversation("alice", None).await.unwrap();

        let err = chat
            .send("mallory", Some(&conv.id), "hello?", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let messages = history.list_messages("alice", &conv.id, 10).await.unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn long_questions_truncate_into_titles() {
        let long = "word ".repeat(40);
        let title = title_from(&long);
        assert!(title.chars().count() <= TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }
}
