use std::sync::Arc;

use crate::{
    backfill::BackfillJob,
    catalog::{CatalogStore, PostgrestCatalog},
    config::{Config, Credentials, SearchMode},
    embeddings::{EmbeddingClient, OpenAiEmbedder},
    search::{
        SearchBackend, SearchRequestHandler, SemanticSearch, SimilaritySearchService,
        SubstringSearch,
    },
};

use super::errors::AppError;

/// Everything the endpoints and CLI commands run against.
#[derive(Clone)]
pub struct AppServices {
    pub search: SearchRequestHandler,
    /// `Err` names the missing configuration.
    pub backfill: Result<Arc<BackfillJob>, String>,
}

impl AppServices {
    pub fn backfill(&self) -> Result<&BackfillJob, AppError> {
        self.backfill
            .as_ref()
            .map(Arc::as_ref)
            .map_err(|missing| AppError::Misconfigured(missing.clone()))
    }
}

/// Catalog and embedder clients built from credentials.
struct Upstreams {
    catalog: Arc<dyn CatalogStore>,
    embedder: Arc<dyn EmbeddingClient>,
}

/// Application factory: wires configuration and credentials into services
pub struct AppFactory;

impl AppFactory {
    /// Missing credentials do not fail here. The affected services answer
    /// every request with `Misconfigured` instead, so the daemon still starts.
    pub fn create_services(config: &Config, credentials: &Credentials) -> AppServices {
        log::debug!("credentials: {credentials:?}");

        let upstreams = Self::create_upstreams(config, credentials).map_err(|err| {
            log::warn!("semantic pipeline unavailable: {err}");
            err
        });

        let search = match (config.search.mode, &upstreams) {
            (SearchMode::Substring, _) => SearchRequestHandler::new(
                &config.search,
                SearchBackend::Substring(SubstringSearch::new()),
            ),
            (SearchMode::Semantic, Ok(upstreams)) => {
                let similarity = SimilaritySearchService::new(
                    upstreams.catalog.clone(),
                    config.search.max_limit as usize,
                );
                SearchRequestHandler::new(
                    &config.search,
                    SearchBackend::Semantic(SemanticSearch::new(
                        upstreams.embedder.clone(),
                        similarity,
                    )),
                )
            }
            (SearchMode::Semantic, Err(missing)) => {
                SearchRequestHandler::misconfigured(&config.search, missing.clone())
            }
        };

        let backfill = upstreams.map(|upstreams| {
            Arc::new(BackfillJob::new(
                upstreams.catalog,
                upstreams.embedder,
                &config.backfill,
            ))
        });

        log::info!("search mode: {:?}", config.search.mode);

        AppServices { search, backfill }
    }

    fn create_upstreams(config: &Config, credentials: &Credentials) -> Result<Upstreams, String> {
        let resolved = credentials.require().map_err(|err| match err {
            AppError::Misconfigured(missing) => missing,
            other => other.to_string(),
        })?;

        let catalog = PostgrestCatalog::new(
            &resolved.catalog_url,
            &resolved.catalog_key,
            &config.catalog,
        )
        .map_err(|err| format!("{}: {err}", crate::config::ENV_CATALOG_URL))?;

        let embedder = OpenAiEmbedder::new(&resolved.embedding_key, &config.embeddings)
            .map_err(|err| format!("{}: {err}", crate::config::ENV_EMBEDDING_KEY))?;
        log::info!(
            "embedding with {} via {}",
            config.embeddings.model,
            embedder.endpoint()
        );

        Ok(Upstreams {
            catalog: Arc::new(catalog),
            embedder: Arc::new(embedder),
        })
    }
}
