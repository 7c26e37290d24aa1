//! Transcript rows and their processing lifecycle.
//!
//! A transcript is created on upload and only ever mutated by the processor
//! (status transitions, metadata) or the storage path fix. Never deleted
//! automatically.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::core::config::AppPaths;
use crate::core::errors::ApiError;

/// Historical uploads carry this redundant prefix in their storage path;
/// bucket files live directly under the bucket dir.
const REDUNDANT_PATH_PREFIX: &str = "transcripts/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptStatus {
    Unprocessed,
    Processing,
    Processed,
    Summarized,
    Failed,
    Empty,
    /// Never persisted; computed at read time when a transcript has sat in
    /// `processing` past the staleness window.
    Stuck,
}

impl fmt::Display for TranscriptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TranscriptStatus::Unprocessed => "unprocessed",
            TranscriptStatus::Processing => "processing",
            TranscriptStatus::Processed => "processed",
            TranscriptStatus::Summarized => "summarized",
            TranscriptStatus::Failed => "failed",
            TranscriptStatus::Empty => "empty",
            TranscriptStatus::Stuck => "stuck",
        };
        f.write_str(s)
    }
}

impl FromStr for TranscriptStatus {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unprocessed" => Ok(TranscriptStatus::Unprocessed),
            "processing" => Ok(TranscriptStatus::Processing),
            "processed" => Ok(TranscriptStatus::Processed),
            "summarized" => Ok(TranscriptStatus::Summarized),
            "failed" => Ok(TranscriptStatus::Failed),
            "empty" => Ok(TranscriptStatus::Empty),
            "stuck" => Ok(TranscriptStatus::Stuck),
            other => Err(ApiError::Internal(format!(
                "unknown transcript status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub id: String,
    pub title: String,
    pub content: Option<String>,
    pub storage_path: Option<String>,
    pub status: TranscriptStatus,
    pub metadata: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl Transcript {
    /// Raw text for processing: inline content first, else the bucket file at
    /// the normalized storage path.
    pub fn resolve_content(&self, paths: &AppPaths) -> Result<String, ApiError> {
        if let Some(content) = &self.content {
            if !content.trim().is_empty() {
                return Ok(content.clone());
            }
        }
        let Some(storage_path) = &self.storage_path else {
            return Ok(String::new());
        };
        let file = paths.bucket_dir.join(fix_storage_path(storage_path));
        std::fs::read_to_string(&file)
            .map_err(|e| ApiError::Internal(format!("failed to read {}: {e}", file.display())))
    }
}

/// Strips the redundant `transcripts/` prefix. Idempotent: applying it to an
/// already-fixed path returns the path unchanged.
pub fn fix_storage_path(path: &str) -> String {
    let mut fixed = path.trim_start_matches('/');
    while let Some(rest) = fixed.strip_prefix(REDUNDANT_PATH_PREFIX) {
        fixed = rest;
    }
    fixed.to_string()
}

#[derive(Clone)]
pub struct TranscriptStore {
    pool: SqlitePool,
}

impl TranscriptStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transcripts (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT,
                storage_path TEXT,
                status TEXT NOT NULL DEFAULT 'unprocessed',
                metadata TEXT DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')),
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(Self { pool })
    }

    pub async fn create(
        &self,
        title: &str,
        content: Option<&str>,
        storage_path: Option<&str>,
    ) -> Result<Transcript, ApiError> {
        let id = Uuid::new_v4().to_string();
        let fixed_path = storage_path.map(fix_storage_path);
        let metadata = json!({
            "extracted_at": Utc::now().to_rfc3339(),
            "extraction_method": if content.is_some() { "inline" } else { "upload" },
        });

        sqlx::query(
            "INSERT INTO transcripts (id, title, content, storage_path, status, metadata)
             VALUES (?1, ?2, ?3, ?4, 'unprocessed', ?5)",
        )
        .bind(&id)
        .bind(title)
        .bind(content)
        .bind(&fixed_path)
        .bind(metadata.to_string())
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        self.get(&id)
            .await?
            .ok_or_else(|| ApiError::Internal("transcript vanished after insert".to_string()))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Transcript>, ApiError> {
        let row = sqlx::query(
            "SELECT id, title, content, storage_path, status, metadata, created_at, updated_at
             FROM transcripts WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        row.as_ref().map(row_to_transcript).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Transcript>, ApiError> {
        let rows = sqlx::query(
            "SELECT id, title, content, storage_path, status, metadata, created_at, updated_at
             FROM transcripts ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        rows.iter().map(row_to_transcript).collect()
    }

    pub async fn set_status(&self, id: &str, status: TranscriptStatus) -> Result<(), ApiError> {
        let result = sqlx::query(
            "UPDATE transcripts
             SET status = ?2, updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?1",
        )
        .bind(id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound(format!("transcript {id} not found")));
        }
        Ok(())
    }

    /// Merges keys into the metadata JSON. Existing keys not named are kept.
    pub async fn merge_metadata(&self, id: &str, patch: Value) -> Result<(), ApiError> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("transcript {id} not found")))?;

        let mut merged = current.metadata.unwrap_or_else(|| json!({}));
        if let (Some(target), Some(source)) = (merged.as_object_mut(), patch.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }

        sqlx::query(
            "UPDATE transcripts
             SET metadata = ?2, updated_at = STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now')
             WHERE id = ?1",
        )
        .bind(id)
        .bind(merged.to_string())
        .execute(&self.pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Effective status for display: `processing` rows older than the
    /// staleness window report as `stuck`.
    pub fn effective_status(transcript: &Transcript, stuck_after_secs: i64) -> TranscriptStatus {
        if transcript.status != TranscriptStatus::Processing {
            return transcript.status;
        }
        let Ok(updated) = DateTime::parse_from_rfc3339(&transcript.updated_at) else {
            return transcript.status;
        };
        if Utc::now().signed_duration_since(updated.with_timezone(&Utc))
            > Duration::seconds(stuck_after_secs)
        {
            TranscriptStatus::Stuck
        } else {
            TranscriptStatus::Processing
        }
    }

    /// Normalizes every stored storage path. Returns how many rows changed;
    /// a second run always reports zero.
    pub async fn fix_storage_paths(&self) -> Result<usize, ApiError> {
        let rows = sqlx::query("SELECT id, storage_path FROM transcripts WHERE storage_path IS NOT NULL")
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        let mut fixed_count = 0;
        for row in rows {
            let id: String = row.get("id");
            let path: String = row.get("storage_path");
            let fixed = fix_storage_path(&path);
            if fixed != path {
                sqlx::query("UPDATE transcripts SET storage_path = ?2 WHERE id = ?1")
                    .bind(&id)
                    .bind(&fixed)
                    .execute(&self.pool)
                    .await
                    .map_err(ApiError::internal)?;
                fixed_count += 1;
            }
        }

        Ok(fixed_count)
    }
}

fn row_to_transcript(row: &sqlx::sqlite::SqliteRow) -> Result<Transcript, ApiError> {
    let status_str: String = row.get("status");
    let metadata_str: Option<String> = row.get("metadata");

    Ok(Transcript {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        storage_path: row.get("storage_path"),
        status: status_str.parse()?,
        metadata: metadata_str.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (TranscriptStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::store::open_pool(&dir.path().join("test.db"))
            .await
            .unwrap();
        (TranscriptStore::new(pool).await.unwrap(), dir)
    }

    #[test]
    fn storage_path_fix_strips_prefix_and_is_idempotent() {
        assert_eq!(fix_storage_path("transcripts/meeting1.txt"), "meeting1.txt");
        assert_eq!(fix_storage_path("meeting1.txt"), "meeting1.txt");
        assert_eq!(
            fix_storage_path(&fix_storage_path("transcripts/meeting1.txt")),
            "meeting1.txt"
        );
        assert_eq!(
            fix_storage_path("transcripts/transcripts/q3-review.txt"),
            "q3-review.txt"
        );
    }

    #[tokio::test]
    async fn create_starts_unprocessed() {
        let (store, _dir) = test_store().await;
        let t = store
            .create("Q3 review", Some("some text"), None)
            .await
            .unwrap();
        assert_eq!(t.status, TranscriptStatus::Unprocessed);
        assert_eq!(t.title, "Q3 review");
    }

    #[tokio::test]
    async fn status_transitions_and_metadata_merge() {
        let (store, _dir) = test_store().await;
        let t = store.create("t", Some("text"), None).await.unwrap();

        store
            .set_status(&t.id, TranscriptStatus::Processed)
            .await
            .unwrap();
        store
            .merge_metadata(&t.id, serde_json::json!({"chunk_count": 4}))
            .await
            .unwrap();

        let loaded = store.get(&t.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TranscriptStatus::Processed);
        let meta = loaded.metadata.unwrap();
        assert_eq!(meta["chunk_count"], 4);
        // Keys written at creation survive the merge.
        assert!(meta.get("extracted_at").is_some());
    }

    #[tokio::test]
    async fn fix_storage_paths_second_run_changes_nothing() {
        let (store, _dir) = test_store().await;
        let t = store
            .create("t", None, Some("transcripts/raw.txt"))
            .await
            .unwrap();
        // create() already normalizes; force a dirty value to simulate a
        // legacy row.
        sqlx::query("UPDATE transcripts SET storage_path = 'transcripts/raw.txt' WHERE id = ?1")
            .bind(&t.id)
            .execute(&store.pool)
            .await
            .unwrap();

        assert_eq!(store.fix_storage_paths().await.unwrap(), 1);
        assert_eq!(store.fix_storage_paths().await.unwrap(), 0);

        let loaded = store.get(&t.id).await.unwrap().unwrap();
        assert_eq!(loaded.storage_path.as_deref(), Some("raw.txt"));
    }

    #[tokio::test]
    async fn missing_transcript_status_update_is_not_found() {
        let (store, _dir) = test_store().await;
        let err = store
            .set_status("nope", TranscriptStatus::Processed)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
