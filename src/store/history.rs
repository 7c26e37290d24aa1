//! Conversations and messages.
//!
//! Messages are append-only, with one exception: the optimistic assistant
//! placeholder appended while an answer is in flight is resolved in place with
//! the reply (or a user-visible error message) when the request settles.
//! Every message insert bumps the owning conversation's `updated_at`, which is
//! what keeps sidebar ordering correct.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };
        f.write_str(s)
    }
}

impl FromStr for MessageRole {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(ApiError::Internal(format!("unknown message role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: String,
    pub user_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Canonical model tag for assistant messages ("gemini", ...). Resolved
    /// once at append time; there is no legacy boolean alongside it.
    pub source: Option<String>,
    pub citations: Vec<String>,
    pub pending: bool,
    pub created_at: String,
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                source TEXT,
                citations TEXT DEFAULT '[]',
                pending INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(Self { pool })
    }

    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: Option<String>,
    ) -> Result<Conversation, ApiError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(&title)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        self.get_conversation(user_id, &id)
            .await?
            .ok_or_else(|| ApiError::Internal("conversation vanished after insert".to_string()))
    }

    pub async fn get_conversation(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<Conversation>, ApiError> {
        let row = sqlx::query(
            "SELECT c.id, c.user_id, c.title, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS msg_count
             FROM conversations c
             WHERE c.id = ?1 AND c.user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(row.map(|row| Conversation {
            id: row.get("id"),
            user_id: row.get("user_id"),
            title: row.get("title"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            message_count: row.get("msg_count"),
        }))
    }

    /// Sidebar listing: most recently updated first.
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>, ApiError> {
        let rows = sqlx::query(
            "SELECT c.id, c.user_id, c.title, c.created_at, c.updated_at,
                    (SELECT COUNT(*) FROM messages m WHERE m.conversation_id = c.id) AS msg_count
             FROM conversations c
             WHERE c.user_id = ?1
             ORDER BY c.updated_at DESC
             LIMIT 200",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(rows
            .into_iter()
            .map(|row| Conversation {
                id: row.get("id"),
                user_id: row.get("user_id"),
                title: row.get("title"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
                message_count: row.get("msg_count"),
            })
            .collect())
    }

    pub async fn rename_conversation(
        &self,
        user_id: &str,
        id: &str,
        title: &str,
    ) -> Result<(), ApiError> {
        let result = sqlx::query(
            "UPDATE conversations SET title = ?3, updated_at = ?4
             WHERE id = ?1 AND user_id = ?2",
        )
        .bind(id)
        .bind(user_id)
        .bind(title)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Conversation not found".to_string()));
        }
        Ok(())
    }

    /// Explicit user action only; cascades to messages.
    pub async fn delete_conversation(&self, user_id: &str, id: &str) -> Result<(), ApiError> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = ?1 AND user_id = ?2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Conversation not found".to_string()));
        }
        Ok(())
    }

    /// Appends a message and bumps the conversation's `updated_at` to the
    /// message time. Returns the new message id.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        user_id: &str,
        role: MessageRole,
        content: &str,
        source: Option<&str>,
        citations: &[String],
        pending: bool,
    ) -> Result<i64, ApiError> {
        // Ownership check before the write.
        let owned = self.get_conversation(user_id, conversation_id).await?;
        if owned.is_none() {
            return Err(ApiError::NotFound("Conversation not found".to_string()));
        }

        let now = Utc::now().to_rfc3339();
        let citations_json =
            serde_json::to_string(citations).unwrap_or_else(|_| "[]".to_string());

        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        let result = sqlx::query(
            "INSERT INTO messages (conversation_id, user_id, role, content, source, citations, pending, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(role.to_string())
        .bind(content)
        .bind(source)
        .bind(&citations_json)
        .bind(pending as i64)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("UPDATE conversations SET updated_at = ?2 WHERE id = ?1")
            .bind(conversation_id)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(result.last_insert_rowid())
    }

    /// Resolves a pending placeholder with its final content. Keeps the
    /// original `created_at` so the optimistic ordering holds.
    pub async fn resolve_pending(
        &self,
        message_id: i64,
        content: &str,
        source: Option<&str>,
        citations: &[String],
    ) -> Result<(), ApiError> {
        let citations_json =
            serde_json::to_string(citations).unwrap_or_else(|_| "[]".to_string());

        let result = sqlx::query(
            "UPDATE messages SET content = ?2, source = ?3, citations = ?4, pending = 0
             WHERE id = ?1 AND pending = 1",
        )
        .bind(message_id)
        .bind(content)
        .bind(source)
        .bind(&citations_json)
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound("Pending message not found".to_string()));
        }
        Ok(())
    }

    /// Message list ordered by creation time ascending, id as tiebreaker, so
    /// insertion races cannot reorder the view.
    pub async fn list_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: i64,
    ) -> Result<Vec<Message>, ApiError> {
        let owned = self.get_conversation(user_id, conversation_id).await?;
        if owned.is_none() {
            return Err(ApiError::NotFound("Conversation not found".to_string()));
        }

        let rows = sqlx::query(
            "SELECT id, conversation_id, user_id, role, content, source, citations, pending, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at ASC, id ASC
             LIMIT ?2",
        )
        .bind(conversation_id)
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.iter().map(Self::row_to_message).collect()
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, ApiError> {
        let role_str: String = row.get("role");
        let citations_str: String = row.get("citations");
        let citations: Vec<String> = serde_json::from_str(&citations_str).unwrap_or_default();
        let pending: i64 = row.get("pending");

        Ok(Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            user_id: row.get("user_id"),
            role: role_str.parse()?,
            content: row.get("content"),
            source: row.get("source"),
            citations,
            pending: pending != 0,
            created_at: row.get("created_at"),
        })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (HistoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::store::open_pool(&dir.path().join("test.db"))
            .await
            .unwrap();
        (HistoryStore::new(pool).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn messages_are_listed_in_creation_order() {
        let (store, _dir) = test_store().await;
        let conv = store.create_conversation("u1", None).await.unwrap();

        for i in 0..5 {
            store
                .append_message(
                    &conv.id,
                    "u1",
                    if i % 2 == 0 {
                        MessageRole::User
                    } else {
                        MessageRole::Assistant
                    },
                    &format!("m{i}"),
                    None,
                    &[],
                    false,
                )
                .await
                .unwrap();
        }

        let messages = store.list_messages("u1", &conv.id, 100).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn same_timestamp_orders_by_insert_id() {
        let (store, _dir) = test_store().await;
        let conv = store.create_conversation("u1", None).await.unwrap();

        // Force identical timestamps to simulate an insertion race.
        let now = Utc::now().to_rfc3339();
        for content in ["first", "second", "third"] {
            sqlx::query(
                "INSERT INTO messages (conversation_id, user_id, role, content, created_at)
                 VALUES (?1, 'u1', 'user', ?2, ?3)",
            )
            .bind(&conv.id)
            .bind(content)
            .bind(&now)
            .execute(store.pool())
            .await
            .unwrap();
        }

        let messages = store.list_messages("u1", &conv.id, 100).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn appending_bumps_conversation_updated_at() {
        let (store, _dir) = test_store().await;
        let conv = store.create_conversation("u1", None).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .append_message(&conv.id, "u1", MessageRole::User, "hi", None, &[], false)
            .await
            .unwrap();

        let after = store
            .get_conversation("u1", &conv.id)
            .await
            .unwrap()
            .unwrap();
        assert!(after.updated_at > conv.updated_at);
    }

    #[tokio::test]
    async fn pending_message_resolves_in_place() {
        let (store, _dir) = test_store().await;
        let conv = store.create_conversation("u1", None).await.unwrap();

        let id = store
            .append_message(
                &conv.id,
                "u1",
                MessageRole::Assistant,
                "…",
                None,
                &[],
                true,
            )
            .await
            .unwrap();

        store
            .resolve_pending(id, "the answer", Some("gemini"), &["Board meeting".to_string()])
            .await
            .unwrap();

        let messages = store.list_messages("u1", &conv.id, 10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].pending);
        assert_eq!(messages[0].content, "the answer");
        assert_eq!(messages[0].citations, vec!["Board meeting"]);

        // Resolving twice fails: the row is no longer pending.
        assert!(store.resolve_pending(id, "again", None, &[]).await.is_err());
    }

    #[tokio::test]
    async fn other_users_conversations_are_invisible() {
        let (store, _dir) = test_store().await;
        let conv = store.create_conversation("alice", None).await.unwrap();

        assert!(store
            .get_conversation("mallory", &conv.id)
            .await
            .unwrap()
            .is_none());
        assert!(store.list_messages("mallory", &conv.id, 10).await.is_err());
        assert!(store
            .delete_conversation("mallory", &conv.id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let (store, _dir) = test_store().await;
        let conv = store.create_conversation("u1", None).await.unwrap();
        store
            .append_message(&conv.id, "u1", MessageRole::User, "hi", None, &[], false)
            .await
            .unwrap();

        store.delete_conversation("u1", &conv.id).await.unwrap();

        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }
}
