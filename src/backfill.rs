//! Embedding backfill.
//!
//! Scans the catalog for products without an embedding, embeds their names
//! one at a time and writes the vectors back. A record that cannot be
//! embedded or saved is counted as skipped; the batch always runs to the end.

use std::{fmt::Display, future::Future, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    app::errors::AppError, catalog::CatalogStore, config::BackfillConfig,
    embeddings::EmbeddingClient,
};

pub const NOTHING_TO_DO: &str = "No products found without embeddings";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillBatchResult {
    pub scanned: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub batch_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Exponential backoff: the retry after failed attempt `n` (0-indexed) waits
/// `base_delay * 2^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &BackfillConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Runs `op` until it succeeds or `max_retries` retries are used up, then
    /// returns the last error.
    pub async fn retry<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_retries => return Err(err),
                Err(err) => {
                    let delay = self.delay_after(attempt);
                    log::warn!(
                        "{label}: attempt {} failed, retrying in {}ms: {err}",
                        attempt + 1,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

pub struct BackfillJob {
    catalog: Arc<dyn CatalogStore>,
    embedder: Arc<dyn EmbeddingClient>,
    retry: RetryPolicy,
    record_delay: Duration,
    default_batch_size: i64,
    max_batch_size: i64,
    // one batch at a time per process
    running: Mutex<()>,
}

impl BackfillJob {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        embedder: Arc<dyn EmbeddingClient>,
        config: &BackfillConfig,
    ) -> Self {
        Self {
            catalog,
            embedder,
            retry: RetryPolicy::from_config(config),
            record_delay: Duration::from_millis(config.record_delay_ms),
            default_batch_size: config.default_batch_size,
            max_batch_size: config.max_batch_size,
            running: Mutex::new(()),
        }
    }

    /// A missing or zero request means the default.
    pub fn batch_size(&self, requested: Option<i64>) -> usize {
        requested
            .filter(|&size| size != 0)
            .unwrap_or(self.default_batch_size)
            .clamp(1, self.max_batch_size.max(1)) as usize
    }

    /// Processes one batch. Only a failure to read the catalog is fatal.
    pub async fn run(&self, requested: Option<i64>) -> Result<BackfillBatchResult, AppError> {
        let batch_size = self.batch_size(requested);
        let _running = self.running.lock().await;

        log::info!("starting backfill with batch size {batch_size}");

        let products = self.catalog.fetch_unembedded(batch_size).await?;

        if products.is_empty() {
            log::info!("{NOTHING_TO_DO}");
            return Ok(BackfillBatchResult {
                scanned: 0,
                embedded: 0,
                skipped: 0,
                batch_size,
                message: Some(NOTHING_TO_DO.to_string()),
            });
        }

        log::info!("found {} products without embeddings", products.len());

        let mut embedded = 0;
        let mut skipped = 0;

        for (idx, product) in products.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.record_delay).await;
            }

            log::debug!("processing product {}: {}", product.id, product.name);

            let label = format!("product {}", product.id);
            let embedding = match self
                .retry
                .retry(&label, || self.embedder.embed(&product.name))
                .await
            {
                Ok(embedding) => embedding,
                Err(err) => {
                    log::error!("failed to embed product {}: {err}", product.id);
                    skipped += 1;
                    continue;
                }
            };

            match self.catalog.set_embedding(product.id, &embedding).await {
                Ok(true) => {
                    log::debug!("embedded product {}", product.id);
                    embedded += 1;
                }
                Ok(false) => {
                    log::warn!("product {} was embedded by another run", product.id);
                    skipped += 1;
                }
                Err(err) => {
                    log::error!("failed to update product {}: {err}", product.id);
                    skipped += 1;
                }
            }
        }

        let result = BackfillBatchResult {
            scanned: products.len(),
            embedded,
            skipped,
            batch_size,
            message: None,
        };

        log::info!(
            "backfill complete: scanned={} embedded={} skipped={}",
            result.scanned,
            result.embedded,
            result.skipped
        );

        Ok(result)
    }
}
