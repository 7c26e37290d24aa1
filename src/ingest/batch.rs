//! Batch driver: bounded fan-out over the transcript processor.
//!
//! Partitions ids into fixed-size batches, processes one batch concurrently
//! (parallelism = batch size), then cools down before the next. Outcomes are
//! per-id and independent; one failure never cancels its siblings and there is
//! no global transaction.

use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;

use crate::ingest::processor::TranscriptProcessor;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            batch_delay: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub transcript_id: String,
    pub error: String,
}

/// Per-run accounting. `succeeded.len() + failed.len()` always equals the
/// number of ids passed in.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

pub struct BatchProcessor {
    processor: TranscriptProcessor,
    config: BatchConfig,
}

impl BatchProcessor {
    pub fn new(processor: TranscriptProcessor, config: BatchConfig) -> Self {
        Self { processor, config }
    }

    pub async fn run(&self, ids: &[String], force: bool) -> BatchOutcome {
        let batch_size = self.config.batch_size.max(1);
        let mut outcome = BatchOutcome::default();

        for (batch_index, batch) in ids.chunks(batch_size).enumerate() {
            if batch_index > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }

            let futures = batch
                .iter()
                .map(|id| self.processor.process(id, force))
                .collect::<Vec<_>>();

            // allSettled-style join: every future runs to completion.
            let results = join_all(futures).await;

            for (id, result) in batch.iter().zip(results) {
                match result {
                    Ok(_) => outcome.succeeded.push(id.clone()),
                    Err(err) => {
                        tracing::warn!("Batch processing failed for {}: {}", id, err);
                        outcome.failed.push(BatchFailure {
                            transcript_id: id.clone(),
                            error: err.to_string(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            "Batch run complete: {} ok, {} failed",
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        outcome
    }

    /// Re-attempts only the ids that failed in a previous run.
    pub async fn retry_failed(&self, previous: &BatchOutcome, force: bool) -> BatchOutcome {
        let ids: Vec<String> = previous
            .failed
            .iter()
            .map(|f| f.transcript_id.clone())
            .collect();
        self.run(&ids, force).await
    }
}
