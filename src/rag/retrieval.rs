//! Retrieval: shapes the search request, runs it against the chunk store and
//! trusts the ordering that comes back.

use std::sync::Arc;

use serde::Deserialize;

use crate::core::errors::ApiError;
use crate::provider::ModelProvider;
use crate::store::chunks::{ChunkStore, ScoredChunk};

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Restrict matches to one transcript.
    #[serde(default)]
    pub transcript_id: Option<String>,
    #[serde(default = "default_match_count")]
    pub match_count: usize,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f32,
    /// Merge in keyword matches the vectors missed.
    #[serde(default)]
    pub hybrid: bool,
    /// Weight scores by recorded chunk feedback.
    #[serde(default)]
    pub use_feedback: bool,
}

fn default_match_count() -> usize {
    5
}

fn default_threshold() -> f32 {
    0.3
}

#[derive(Clone)]
pub struct Retriever {
    chunks: ChunkStore,
    provider: Arc<dyn ModelProvider>,
}

impl Retriever {
    pub fn new(chunks: ChunkStore, provider: Arc<dyn ModelProvider>) -> Self {
        Self { chunks, provider }
    }

    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<ScoredChunk>, ApiError> {
        if request.query.trim().is_empty() {
            return Err(ApiError::BadRequest("query must not be empty".to_string()));
        }

        let query_embedding = self
            .provider
            .embed(std::slice::from_ref(&request.query))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Upstream("no embedding for query".to_string()))?;

        let mut results = self
            .chunks
            .search(
                &query_embedding,
                request.match_count,
                request.similarity_threshold,
                request.transcript_id.as_deref(),
                request.use_feedback,
            )
            .await?;

        if request.hybrid {
            self.merge_keyword_hits(request, &mut results).await?;
        }

        Ok(results)
    }

    /// Keyword hits join below every vector hit, at half the threshold floor,
    /// so they fill gaps without outranking semantic matches.
    async fn merge_keyword_hits(
        &self,
        request: &SearchRequest,
        results: &mut Vec<ScoredChunk>,
    ) -> Result<(), ApiError> {
        if results.len() >= request.match_count {
            return Ok(());
        }

        let keyword_hits = self
            .chunks
            .text_search(
                &request.query,
                request.match_count,
                request.transcript_id.as_deref(),
            )
            .await?;

        let keyword_score = request.similarity_threshold * 0.5;
        for hit in keyword_hits {
            if results.len() >= request.match_count {
                break;
            }
            if results.iter().any(|r| r.chunk.chunk_id == hit.chunk_id) {
                continue;
            }
            results.push(ScoredChunk {
                chunk: hit,
                score: keyword_score,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::hash_embed::HashEmbedder;
    use crate::store::chunks::StoredChunk;
    use crate::store::transcripts::TranscriptStore;

    async fn seeded_retriever() -> (Retriever, String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::store::open_pool(&dir.path().join("test.db"))
            .await
            .unwrap();
        let transcripts = TranscriptStore::new(pool.clone()).await.unwrap();
        let chunks = ChunkStore::new(pool).await.unwrap();
        let provider = Arc::new(HashEmbedder::new());

        let t = transcripts
            .create("All hands", Some("x"), None)
            .await
            .unwrap();

        let contents = [
            "quarterly revenue grew eleven percent",
            "hiring freeze continues through winter",
            "the new office opens in March",
        ];
        let texts: Vec<String> = contents.iter().map(|s| s.to_string()).collect();
        let embeddings = provider.embed(&texts).await.unwrap();
        let items = contents
            .iter()
            .enumerate()
            .zip(embeddings)
            .map(|((i, content), emb)| {
                (
                    StoredChunk {
                        chunk_id: format!("c{i}"),
                        transcript_id: t.id.clone(),
                        chunk_index: i as i64,
                        content: content.to_string(),
                        source: "All hands".to_string(),
                        metadata: None,
                    },
                    emb,
                )
            })
            .collect();
        chunks.replace_for_transcript(&t.id, items).await.unwrap();

        (Retriever::new(chunks, provider), t.id, dir)
    }

    fn request(query: &str) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            transcript_id: None,
            match_count: 5,
            similarity_threshold: 0.0,
            hybrid: false,
            use_feedback: false,
        }
    }

    #[tokio::test]
    async fn best_match_ranks_first() {
        let (retriever, _tid, _dir) = seeded_retriever().await;
        let results = retriever
            .search(&request("quarterly revenue numbers"))
            .await
            .unwrap();

        assert!(!results.is_empty());
        assert!(results[0].chunk.content.contains("revenue"));
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn transcript_filter_restricts_results() {
        let (retriever, tid, _dir) = seeded_retriever().await;

        let mut req = request("revenue");
        req.transcript_id = Some(tid);
        assert!(!retriever.search(&req).await.unwrap().is_empty());

        req.transcript_id = Some("other".to_string());
        assert!(retriever.search(&req).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hybrid_adds_keyword_hits_below_vector_hits() {
        let (retriever, _tid, _dir) = seeded_retriever().await;

        // High threshold suppresses vector hits; the keyword "March" still
        // wants to surface its chunk.
        let mut req = request("March");
        req.similarity_threshold = 0.99;
        req.hybrid = true;

        let results = retriever.search(&req).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].chunk.content.contains("March"));
        assert!(results[0].score < 0.99);
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let (retriever, _tid, _dir) = seeded_retriever().await;
        assert!(matches!(
            retriever.search(&request("   ")).await,
            Err(ApiError::BadRequest(_))
        ));
    }
}
