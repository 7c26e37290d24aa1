use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::chat::ChatService;
use crate::core::config::{AppPaths, Settings};
use crate::core::security::{init_session_token, SessionToken};
use crate::ingest::batch::BatchConfig;
use crate::ingest::chunker::{ChunkStrategy, ChunkerConfig};
use crate::ingest::processor::TranscriptProcessor;
use crate::provider::gemini::GeminiProvider;
use crate::provider::hash_embed::HashEmbedder;
use crate::provider::speech::SpeechClient;
use crate::provider::ModelProvider;
use crate::rag::answer::{AnswerComposer, AnswerConfig};
use crate::rag::retrieval::Retriever;
use crate::realtime::RealtimeBus;
use crate::store::chunks::ChunkStore;
use crate::store::history::HistoryStore;
use crate::store::transcripts::TranscriptStore;

#[derive(Clone)]
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub settings: Settings,
    pub session_token: SessionToken,
    pub transcripts: TranscriptStore,
    pub chunks: ChunkStore,
    pub history: HistoryStore,
    pub processor: TranscriptProcessor,
    pub retriever: Retriever,
    pub composer: AnswerComposer,
    pub chat: ChatService,
    pub speech: SpeechClient,
    pub bus: RealtimeBus,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub async fn initialize(paths: Arc<AppPaths>) -> anyhow::Result<Arc<Self>> {
        let settings = Settings::load(&paths);
        let session_token = init_session_token(&paths);

        let pool = crate::store::open_pool(&paths.db_path).await?;
        let transcripts = TranscriptStore::new(pool.clone()).await?;
        let chunks = ChunkStore::new(pool.clone()).await?;
        let history = HistoryStore::new(pool).await?;

        let provider: Arc<dyn ModelProvider> = match &settings.model_api_key {
            Some(key) => Arc::new(GeminiProvider::new(
                key.clone(),
                settings.chat_model.clone(),
                settings.embedding_model.clone(),
            )),
            None => {
                tracing::warn!(
                    "INSIGHT_MODEL_API_KEY is not set; running with the offline provider"
                );
                Arc::new(HashEmbedder::new())
            }
        };

        let chunker = ChunkerConfig {
            strategy: settings
                .chunk_strategy
                .parse::<ChunkStrategy>()
                .unwrap_or(ChunkStrategy::Sentence),
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
        };
        let processor = TranscriptProcessor::new(
            transcripts.clone(),
            chunks.clone(),
            provider.clone(),
            paths.clone(),
            chunker,
        );

        let retriever = Retriever::new(chunks.clone(), provider.clone());
        let composer = AnswerComposer::new(
            retriever.clone(),
            provider.clone(),
            AnswerConfig {
                match_count: settings.match_count,
                similarity_threshold: settings.similarity_threshold,
                max_context_chars: 6000,
                timeout: Duration::from_secs(settings.answer_timeout_secs),
            },
        );

        let bus = RealtimeBus::new();
        let chat = ChatService::new(history.clone(), composer.clone(), bus.clone());
        let speech = SpeechClient::new(settings.speech_api_key.clone());

        Ok(Arc::new(AppState {
            paths,
            settings,
            session_token,
            transcripts,
            chunks,
            history,
            processor,
            retriever,
            composer,
            chat,
            speech,
            bus,
            started_at: Utc::now(),
        }))
    }

    pub fn batch_config(&self, batch_size: Option<usize>, delay_ms: Option<u64>) -> BatchConfig {
        BatchConfig {
            batch_size: batch_size.unwrap_or(self.settings.batch_size).max(1),
            batch_delay: Duration::from_millis(delay_ms.unwrap_or(self.settings.batch_delay_ms)),
        }
    }
}
