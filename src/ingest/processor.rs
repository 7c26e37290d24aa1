//! Per-transcript processing: raw text → chunks + embeddings → chunk rows.
//!
//! Failure policy: any step failing flips the transcript to `failed` and
//! returns the error. Retries are the batch driver's job, not this one's.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::core::config::AppPaths;
use crate::core::errors::ApiError;
use crate::ingest::chunker::{self, ChunkerConfig};
use crate::provider::{ChatMessage, ModelProvider};
use crate::store::chunks::{ChunkStore, StoredChunk};
use crate::store::transcripts::{TranscriptStatus, TranscriptStore};

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub transcript_id: String,
    pub status: TranscriptStatus,
    pub chunk_count: usize,
}

#[derive(Clone)]
pub struct TranscriptProcessor {
    transcripts: TranscriptStore,
    chunks: ChunkStore,
    provider: Arc<dyn ModelProvider>,
    paths: Arc<AppPaths>,
    chunker: ChunkerConfig,
}

impl TranscriptProcessor {
    pub fn new(
        transcripts: TranscriptStore,
        chunks: ChunkStore,
        provider: Arc<dyn ModelProvider>,
        paths: Arc<AppPaths>,
        chunker: ChunkerConfig,
    ) -> Self {
        Self {
            transcripts,
            chunks,
            provider,
            paths,
            chunker,
        }
    }

    pub async fn process(&self, id: &str, force: bool) -> Result<ProcessOutcome, ApiError> {
        let transcript = self
            .transcripts
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("transcript {id} not found")))?;

        if !force
            && matches!(
                transcript.status,
                TranscriptStatus::Processed | TranscriptStatus::Summarized
            )
        {
            let chunk_count = self.chunks.count(Some(id)).await?;
            return Ok(ProcessOutcome {
                transcript_id: id.to_string(),
                status: transcript.status,
                chunk_count,
            });
        }

        let text = match transcript.resolve_content(&self.paths) {
            Ok(text) => text,
            Err(err) => {
                self.mark_failed(id, &err).await;
                return Err(err);
            }
        };

        if text.trim().is_empty() {
            self.transcripts
                .set_status(id, TranscriptStatus::Empty)
                .await?;
            return Ok(ProcessOutcome {
                transcript_id: id.to_string(),
                status: TranscriptStatus::Empty,
                chunk_count: 0,
            });
        }

        self.transcripts
            .set_status(id, TranscriptStatus::Processing)
            .await?;

        match self.chunk_and_embed(&transcript.title, id, &text).await {
            Ok(chunk_count) => {
                self.transcripts
                    .set_status(id, TranscriptStatus::Processed)
                    .await?;
                self.transcripts
                    .merge_metadata(
                        id,
                        json!({
                            "chunk_count": chunk_count,
                            "chunk_strategy": self.chunker.strategy.to_string(),
                        }),
                    )
                    .await?;

                tracing::info!("Processed transcript {} into {} chunks", id, chunk_count);
                Ok(ProcessOutcome {
                    transcript_id: id.to_string(),
                    status: TranscriptStatus::Processed,
                    chunk_count,
                })
            }
            Err(err) => {
                self.mark_failed(id, &err).await;
                Err(err)
            }
        }
    }

    async fn chunk_and_embed(
        &self,
        title: &str,
        transcript_id: &str,
        text: &str,
    ) -> Result<usize, ApiError> {
        let spans = chunker::split(text, &self.chunker);
        if spans.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let embeddings = self.provider.embed(&texts).await?;
        if embeddings.len() != spans.len() {
            return Err(ApiError::Internal(format!(
                "embedding count mismatch: {} spans, {} vectors",
                spans.len(),
                embeddings.len()
            )));
        }

        let items: Vec<(StoredChunk, Vec<f32>)> = spans
            .into_iter()
            .zip(embeddings)
            .map(|(span, embedding)| {
                (
                    StoredChunk {
                        chunk_id: Uuid::new_v4().to_string(),
                        transcript_id: transcript_id.to_string(),
                        chunk_index: span.index as i64,
                        content: span.text,
                        source: title.to_string(),
                        metadata: Some(json!({ "start_offset": span.start_offset })),
                    },
                    embedding,
                )
            })
            .collect();

        let count = items.len();
        self.chunks
            .replace_for_transcript(transcript_id, items)
            .await?;
        Ok(count)
    }

    /// Summarize into metadata; status flips to `summarized`.
    pub async fn summarize(&self, id: &str) -> Result<String, ApiError> {
        let transcript = self
            .transcripts
            .get(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("transcript {id} not found")))?;

        let text = transcript.resolve_content(&self.paths)?;
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "transcript has no content to summarize".to_string(),
            ));
        }

        let messages = [
            ChatMessage::system(
                "You summarize meeting transcripts. Produce a concise summary \
                 covering decisions, action items and key topics.",
            ),
            ChatMessage::user(text),
        ];

        match self.provider.chat(&messages).await {
            Ok(summary) => {
                self.transcripts
                    .merge_metadata(id, json!({ "summary": summary }))
                    .await?;
                self.transcripts
                    .set_status(id, TranscriptStatus::Summarized)
                    .await?;
                Ok(summary)
            }
            Err(err) => {
                self.mark_failed(id, &err).await;
                Err(err)
            }
        }
    }

    async fn mark_failed(&self, id: &str, err: &ApiError) {
        if let Err(status_err) = self.transcripts.set_status(id, TranscriptStatus::Failed).await {
            tracing::error!("Failed to mark transcript {} as failed: {}", id, status_err);
        }
        let _ = self
            .transcripts
            .merge_metadata(id, json!({ "last_error": err.to_string() }))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::chunker::ChunkStrategy;
    use crate::provider::hash_embed::HashEmbedder;

    async fn test_processor() -> (TranscriptProcessor, TranscriptStore, ChunkStore, tempfile::TempDir)
    {
        let dir = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::for_test(dir.path()));
        let pool = crate::store::open_pool(&paths.db_path).await.unwrap();
        let transcripts = TranscriptStore::new(pool.clone()).await.unwrap();
        let chunks = ChunkStore::new(pool).await.unwrap();
        let processor = TranscriptProcessor::new(
            transcripts.clone(),
            chunks.clone(),
            Arc::new(HashEmbedder::new()),
            paths,
            ChunkerConfig {
                strategy: ChunkStrategy::Sentence,
                chunk_size: 80,
                chunk_overlap: 10,
            },
        );
        (processor, transcripts, chunks, dir)
    }

    #[tokio::test]
    async fn processing_writes_chunks_and_flips_status() {
        let (processor, transcripts, chunks, _dir) = test_processor().await;
        let text = "The board approved the budget. ".repeat(10);
        let t = transcripts.create("Budget", Some(&text), None).await.unwrap();

        let outcome = processor.process(&t.id, false).await.unwrap();
        assert_eq!(outcome.status, TranscriptStatus::Processed);
        assert!(outcome.chunk_count > 1);
        assert_eq!(chunks.count(Some(&t.id)).await.unwrap(), outcome.chunk_count);

        let loaded = transcripts.get(&t.id).await.unwrap().unwrap();
        let meta = loaded.metadata.unwrap();
        assert_eq!(meta["chunk_count"], outcome.chunk_count);
        assert_eq!(meta["chunk_strategy"], "sentence");
    }

    #[tokio::test]
    async fn empty_transcript_becomes_empty_not_failed() {
        let (processor, transcripts, _chunks, _dir) = test_processor().await;
        let t = transcripts.create("Blank", Some("   \n "), None).await.unwrap();

        let outcome = processor.process(&t.id, false).await.unwrap();
        assert_eq!(outcome.status, TranscriptStatus::Empty);
        assert_eq!(outcome.chunk_count, 0);
    }

    #[tokio::test]
    async fn processed_transcript_skipped_without_force() {
        let (processor, transcripts, chunks, _dir) = test_processor().await;
        let t = transcripts
            .create("Once", Some("One sentence here. And another one. "), None)
            .await
            .unwrap();

        processor.process(&t.id, false).await.unwrap();
        let first_count = chunks.count(Some(&t.id)).await.unwrap();

        // Without force nothing changes; with force the generation is rebuilt.
        let skipped = processor.process(&t.id, false).await.unwrap();
        assert_eq!(skipped.chunk_count, first_count);

        let forced = processor.process(&t.id, true).await.unwrap();
        assert_eq!(forced.status, TranscriptStatus::Processed);
    }

    #[tokio::test]
    async fn missing_bucket_file_marks_failed() {
        let (processor, transcripts, _chunks, _dir) = test_processor().await;
        let t = transcripts
            .create("Lost", None, Some("missing-file.txt"))
            .await
            .unwrap();

        assert!(processor.process(&t.id, false).await.is_err());
        let loaded = transcripts.get(&t.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TranscriptStatus::Failed);
        assert!(loaded.metadata.unwrap().get("last_error").is_some());
    }

    #[tokio::test]
    async fn bucket_file_content_is_processed() {
        let (processor, transcripts, _chunks, dir) = test_processor().await;
        std::fs::write(
            dir.path().join("bucket").join("call.txt"),
            "Customer asked about pricing. We promised a follow-up. ",
        )
        .unwrap();

        let t = transcripts
            .create("Call", None, Some("transcripts/call.txt"))
            .await
            .unwrap();
        let outcome = processor.process(&t.id, false).await.unwrap();
        assert_eq!(outcome.status, TranscriptStatus::Processed);
        assert!(outcome.chunk_count >= 1);
    }

    #[tokio::test]
    async fn summarize_flips_status_and_stores_summary() {
        let (processor, transcripts, _chunks, _dir) = test_processor().await;
        let t = transcripts
            .create("Sync", Some("We discussed roadmap and hiring."), None)
            .await
            .unwrap();

        let summary = processor.summarize(&t.id).await.unwrap();
        assert!(!summary.is_empty());

        let loaded = transcripts.get(&t.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TranscriptStatus::Summarized);
        assert!(loaded.metadata.unwrap().get("summary").is_some());
    }
}
