//! In-memory stand-ins for the embedding provider and the catalog store.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::Instant;

use crate::{
    app::{errors::UpstreamError, AppServices},
    backfill::BackfillJob,
    catalog::{CatalogStore, ProductRecord, RankedProduct},
    config::{BackfillConfig, SearchConfig},
    embeddings::{EmbeddingClient, EmbeddingVector},
    search::{SearchBackend, SearchRequestHandler, SemanticSearch, SimilaritySearchService},
};

fn provider_error() -> UpstreamError {
    UpstreamError::Status {
        service: "embedding provider",
        status: StatusCode::TOO_MANY_REQUESTS,
        body: "rate limited".to_string(),
    }
}

/// Embeds every text as the same vector.
#[derive(Default)]
pub struct FixedEmbedder {
    pub vector: EmbeddingVector,
    pub calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(vector: EmbeddingVector) -> Arc<Self> {
        Arc::new(Self {
            vector,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<EmbeddingVector, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector.clone())
    }
}

/// Fails a configured number of times per text, then succeeds.
/// Every attempt is recorded with the (tokio) time it was made.
#[derive(Default)]
pub struct FlakyEmbedder {
    failures: Mutex<HashMap<String, usize>>,
    pub attempts: Mutex<Vec<(String, Instant)>>,
}

impl FlakyEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(self: Arc<Self>, text: &str, times: usize) -> Arc<Self> {
        self.failures
            .lock()
            .unwrap()
            .insert(text.to_string(), times);
        self
    }

    pub fn attempts_for(&self, text: &str) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == text)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[async_trait]
impl EmbeddingClient for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, UpstreamError> {
        self.attempts
            .lock()
            .unwrap()
            .push((text.to_string(), Instant::now()));

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(text) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(provider_error())
            }
            _ => Ok(vec![text.len() as f32, 1.0, 0.0]),
        }
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    pub products: Mutex<Vec<ProductRecord>>,
    pub ranked: Vec<RankedProduct>,
    pub rank_limits: Mutex<Vec<usize>>,
    pub fetch_limits: Mutex<Vec<usize>>,
    pub failing_updates: HashSet<i64>,
    pub fail_reads: bool,
    /// Reads ignore the embedding filter, as if another run wrote in between.
    pub stale_reads: bool,
}

impl MemoryCatalog {
    pub fn with_products(names: &[&str]) -> Self {
        let products = names
            .iter()
            .enumerate()
            .map(|(idx, name)| ProductRecord {
                id: idx as i64 + 1,
                name: name.to_string(),
                price_cents: None,
                embedding: None,
            })
            .collect();

        Self {
            products: Mutex::new(products),
            ..Default::default()
        }
    }

    pub fn with_ranking(ranked: Vec<RankedProduct>) -> Self {
        Self {
            ranked,
            ..Default::default()
        }
    }

    pub fn embedding_of(&self, id: i64) -> Option<EmbeddingVector> {
        self.products
            .lock()
            .unwrap()
            .iter()
            .find(|product| product.id == id)
            .and_then(|product| product.embedding.clone())
    }

    fn store_error() -> UpstreamError {
        UpstreamError::Status {
            service: "catalog store",
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: "connection pool exhausted".to_string(),
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn fetch_unembedded(&self, limit: usize) -> Result<Vec<ProductRecord>, UpstreamError> {
        self.fetch_limits.lock().unwrap().push(limit);
        if self.fail_reads {
            return Err(Self::store_error());
        }

        Ok(self
            .products
            .lock()
            .unwrap()
            .iter()
            .filter(|product| self.stale_reads || product.embedding.is_none())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<bool, UpstreamError> {
        if self.failing_updates.contains(&id) {
            return Err(Self::store_error());
        }

        let mut products = self.products.lock().unwrap();
        let product = products
            .iter_mut()
            .find(|product| product.id == id)
            .ok_or_else(|| UpstreamError::malformed("catalog store", format!("no product {id}")))?;
        if product.embedding.is_some() {
            return Ok(false);
        }
        product.embedding = Some(embedding.to_vec());
        Ok(true)
    }

    async fn rank(
        &self,
        _vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RankedProduct>, UpstreamError> {
        self.rank_limits.lock().unwrap().push(limit);
        if self.fail_reads {
            return Err(Self::store_error());
        }

        Ok(self.ranked.iter().take(limit).cloned().collect())
    }
}

pub fn ranked(id: i64, name: &str, price_cents: Option<i64>, distance: Option<f64>) -> RankedProduct {
    RankedProduct {
        id,
        name: name.to_string(),
        price_cents,
        distance,
    }
}

pub fn semantic_handler(
    embedder: Arc<dyn EmbeddingClient>,
    catalog: Arc<dyn CatalogStore>,
) -> SearchRequestHandler {
    let config = SearchConfig::default();
    let similarity = SimilaritySearchService::new(catalog, config.max_limit as usize);
    SearchRequestHandler::new(
        &config,
        SearchBackend::Semantic(SemanticSearch::new(embedder, similarity)),
    )
}

pub fn backfill_job(
    catalog: Arc<dyn CatalogStore>,
    embedder: Arc<dyn EmbeddingClient>,
) -> BackfillJob {
    BackfillJob::new(catalog, embedder, &BackfillConfig::default())
}

pub fn semantic_services(
    embedder: Arc<dyn EmbeddingClient>,
    catalog: Arc<dyn CatalogStore>,
) -> AppServices {
    AppServices {
        search: semantic_handler(embedder.clone(), catalog.clone()),
        backfill: Ok(Arc::new(backfill_job(catalog, embedder))),
    }
}
