//! Chunk + embedding store.
//!
//! In-process vector store: SQLite rows with the embedding as a little-endian
//! f32 BLOB, brute-force cosine similarity at query time. Chunks are written
//! in bulk by the processor and are immutable; reprocessing a transcript
//! replaces its whole chunk generation inside one transaction.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqlitePool};

use crate::core::errors::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub chunk_id: String,
    pub transcript_id: String,
    /// Ordinal position within the transcript.
    pub chunk_index: i64,
    pub content: String,
    /// Transcript title at processing time, used for citations.
    pub source: String,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    /// Similarity score, higher is better.
    pub score: f32,
}

#[derive(Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
}

impl ChunkStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, ApiError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                chunk_id TEXT PRIMARY KEY,
                transcript_id TEXT NOT NULL REFERENCES transcripts(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                metadata TEXT DEFAULT '{}',
                embedding BLOB,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_transcript ON chunks(transcript_id)")
            .execute(&pool)
            .await
            .map_err(ApiError::internal)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunk_feedback (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chunk_id TEXT NOT NULL,
                vote INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&pool)
        .await
        .map_err(ApiError::internal)?;

        Ok(Self { pool })
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        let denom = norm_a * norm_b;

        if denom <= f32::EPSILON {
            0.0
        } else {
            dot / denom
        }
    }

    /// Replaces the transcript's chunk generation: the old rows and the new
    /// inserts commit atomically, so readers never see a partial generation.
    pub async fn replace_for_transcript(
        &self,
        transcript_id: &str,
        items: Vec<(StoredChunk, Vec<f32>)>,
    ) -> Result<(), ApiError> {
        let mut tx = self.pool.begin().await.map_err(ApiError::internal)?;

        sqlx::query("DELETE FROM chunks WHERE transcript_id = ?1")
            .bind(transcript_id)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;

        for (chunk, embedding) in &items {
            let blob = Self::serialize_embedding(embedding);
            let metadata_str = chunk
                .metadata
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "{}".to_string());

            sqlx::query(
                "INSERT INTO chunks (chunk_id, transcript_id, chunk_index, content, source, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.transcript_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.source)
            .bind(&metadata_str)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(ApiError::internal)?;
        }

        tx.commit().await.map_err(ApiError::internal)?;
        Ok(())
    }

    /// Cosine-similarity search, optionally restricted to one transcript and
    /// optionally weighted by recorded feedback votes.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        threshold: f32,
        transcript_id: Option<&str>,
        use_feedback: bool,
    ) -> Result<Vec<ScoredChunk>, ApiError> {
        let rows = if let Some(transcript_id) = transcript_id {
            sqlx::query(
                "SELECT chunk_id, transcript_id, chunk_index, content, source, metadata, embedding
                 FROM chunks WHERE transcript_id = ?1",
            )
            .bind(transcript_id)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?
        } else {
            sqlx::query(
                "SELECT chunk_id, transcript_id, chunk_index, content, source, metadata, embedding
                 FROM chunks",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?
        };

        let mut scored: Vec<ScoredChunk> = Vec::new();
        for row in &rows {
            // The column is nullable; legacy rows without a vector are
            // invisible to vector search but still reachable by keyword.
            let embedding_bytes: Option<Vec<u8>> = row.get("embedding");
            let Some(embedding_bytes) = embedding_bytes else {
                continue;
            };
            if embedding_bytes.is_empty() {
                continue;
            }
            let stored_emb = Self::deserialize_embedding(&embedding_bytes);
            let mut score = Self::cosine_similarity(query_embedding, &stored_emb);
            if score < threshold {
                continue;
            }
            let chunk = Self::row_to_chunk(row);
            if use_feedback {
                score *= self.feedback_weight(&chunk.chunk_id).await?;
            }
            scored.push(ScoredChunk { chunk, score });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit.max(1));

        Ok(scored)
    }

    /// Keyword search (LIKE), newest first. The hybrid path merges these in
    /// below the vector hits.
    pub async fn text_search(
        &self,
        pattern: &str,
        limit: usize,
        transcript_id: Option<&str>,
    ) -> Result<Vec<StoredChunk>, ApiError> {
        let escaped = format!("%{}%", pattern.trim());
        if escaped == "%%" {
            return Ok(Vec::new());
        }

        let rows = if let Some(transcript_id) = transcript_id {
            sqlx::query(
                "SELECT chunk_id, transcript_id, chunk_index, content, source, metadata
                 FROM chunks
                 WHERE transcript_id = ?1 AND content LIKE ?2
                 ORDER BY created_at DESC
                 LIMIT ?3",
            )
            .bind(transcript_id)
            .bind(&escaped)
            .bind(limit.max(1) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?
        } else {
            sqlx::query(
                "SELECT chunk_id, transcript_id, chunk_index, content, source, metadata
                 FROM chunks
                 WHERE content LIKE ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )
            .bind(&escaped)
            .bind(limit.max(1) as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(ApiError::internal)?
        };

        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    pub async fn count(&self, transcript_id: Option<&str>) -> Result<usize, ApiError> {
        let count: i64 = if let Some(transcript_id) = transcript_id {
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE transcript_id = ?1")
                .bind(transcript_id)
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?
        };

        Ok(count as usize)
    }

    pub async fn record_feedback(&self, chunk_id: &str, helpful: bool) -> Result<(), ApiError> {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE chunk_id = ?1")
            .bind(chunk_id)
            .fetch_one(&self.pool)
            .await
            .map_err(ApiError::internal)?;
        if exists == 0 {
            return Err(ApiError::NotFound(format!("chunk {chunk_id} not found")));
        }

        sqlx::query("INSERT INTO chunk_feedback (chunk_id, vote) VALUES (?1, ?2)")
            .bind(chunk_id)
            .bind(if helpful { 1i64 } else { -1i64 })
            .execute(&self.pool)
            .await
            .map_err(ApiError::internal)?;

        Ok(())
    }

    /// Multiplier from net votes, clamped so feedback can nudge the ranking
    /// but never flip it outright.
    async fn feedback_weight(&self, chunk_id: &str) -> Result<f32, ApiError> {
        let net: Option<i64> =
            sqlx::query_scalar("SELECT SUM(vote) FROM chunk_feedback WHERE chunk_id = ?1")
                .bind(chunk_id)
                .fetch_one(&self.pool)
                .await
                .map_err(ApiError::internal)?;

        let weight = 1.0 + 0.1 * net.unwrap_or(0) as f32;
        Ok(weight.clamp(0.5, 1.5))
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> StoredChunk {
        let metadata_str: String = row.get("metadata");
        let metadata = serde_json::from_str::<Value>(&metadata_str).ok();

        StoredChunk {
            chunk_id: row.get("chunk_id"),
            transcript_id: row.get("transcript_id"),
            chunk_index: row.get("chunk_index"),
            content: row.get("content"),
            source: row.get("source"),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::transcripts::TranscriptStore;

    async fn test_stores() -> (ChunkStore, TranscriptStore, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::store::open_pool(&dir.path().join("test.db"))
            .await
            .unwrap();
        let transcripts = TranscriptStore::new(pool.clone()).await.unwrap();
        let chunks = ChunkStore::new(pool).await.unwrap();
        let t = transcripts.create("Board meeting", Some("x"), None).await.unwrap();
        (chunks, transcripts, t.id, dir)
    }

    fn make_chunk(id: &str, transcript_id: &str, index: i64, content: &str) -> StoredChunk {
        StoredChunk {
            chunk_id: id.to_string(),
            transcript_id: transcript_id.to_string(),
            chunk_index: index,
            content: content.to_string(),
            source: "Board meeting".to_string(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn insert_and_search() {
        let (chunks, _t, tid, _dir) = test_stores().await;

        chunks
            .replace_for_transcript(
                &tid,
                vec![(make_chunk("c1", &tid, 0, "revenue grew"), vec![1.0, 0.0])],
            )
            .await
            .unwrap();

        let results = chunks.search(&[1.0, 0.0], 10, 0.0, None, false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "c1");
        assert!(results[0].score > 0.99);
    }

    #[tokio::test]
    async fn threshold_filters_weak_matches() {
        let (chunks, _t, tid, _dir) = test_stores().await;

        chunks
            .replace_for_transcript(
                &tid,
                vec![
                    (make_chunk("c1", &tid, 0, "aligned"), vec![1.0, 0.0]),
                    (make_chunk("c2", &tid, 1, "orthogonal"), vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let results = chunks.search(&[1.0, 0.0], 10, 0.5, None, false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "c1");
    }

    #[tokio::test]
    async fn reprocessing_supersedes_previous_generation() {
        let (chunks, _t, tid, _dir) = test_stores().await;

        chunks
            .replace_for_transcript(
                &tid,
                vec![
                    (make_chunk("old1", &tid, 0, "old"), vec![1.0]),
                    (make_chunk("old2", &tid, 1, "old"), vec![1.0]),
                ],
            )
            .await
            .unwrap();
        chunks
            .replace_for_transcript(&tid, vec![(make_chunk("new1", &tid, 0, "new"), vec![1.0])])
            .await
            .unwrap();

        assert_eq!(chunks.count(Some(&tid)).await.unwrap(), 1);
        let results = chunks.search(&[1.0], 10, 0.0, Some(&tid), false).await.unwrap();
        assert_eq!(results[0].chunk.chunk_id, "new1");
    }

    #[tokio::test]
    async fn feedback_reranks_equal_matches() {
        let (chunks, _t, tid, _dir) = test_stores().await;

        chunks
            .replace_for_transcript(
                &tid,
                vec![
                    (make_chunk("c1", &tid, 0, "a"), vec![1.0, 0.0]),
                    (make_chunk("c2", &tid, 1, "b"), vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        chunks.record_feedback("c2", true).await.unwrap();
        chunks.record_feedback("c1", false).await.unwrap();

        let results = chunks.search(&[1.0, 0.0], 10, 0.0, None, true).await.unwrap();
        assert_eq!(results[0].chunk.chunk_id, "c2");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn feedback_for_unknown_chunk_is_not_found() {
        let (chunks, _t, _tid, _dir) = test_stores().await;
        assert!(matches!(
            chunks.record_feedback("ghost", true).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn null_embedding_rows_are_skipped_not_fatal() {
        let (chunks, _t, tid, _dir) = test_stores().await;

        chunks
            .replace_for_transcript(
                &tid,
                vec![(make_chunk("c1", &tid, 0, "has a vector"), vec![1.0, 0.0])],
            )
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO chunks (chunk_id, transcript_id, chunk_index, content, embedding)
             VALUES ('legacy', ?1, 1, 'no vector', NULL)",
        )
        .bind(&tid)
        .execute(&chunks.pool)
        .await
        .unwrap();

        let results = chunks.search(&[1.0, 0.0], 10, 0.0, None, false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.chunk_id, "c1");

        // The vectorless row still surfaces through keyword search.
        let hits = chunks.text_search("no vector", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "legacy");
    }

    #[tokio::test]
    async fn text_search_matches_keyword() {
        let (chunks, _t, tid, _dir) = test_stores().await;

        chunks
            .replace_for_transcript(
                &tid,
                vec![
                    (make_chunk("c1", &tid, 0, "churn went down"), vec![1.0]),
                    (make_chunk("c2", &tid, 1, "hiring plan"), vec![1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = chunks.text_search("churn", 10, Some(&tid)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
    }
}
