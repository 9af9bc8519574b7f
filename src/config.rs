use std::{fmt, path::Path, time::Duration};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::app::errors::AppError;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Default embedding model (1536 dimensions)
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;
const DEFAULT_EMBEDDING_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 30;

const DEFAULT_PRODUCTS_TABLE: &str = "products";
const DEFAULT_RANK_FUNCTION: &str = "match_products";

const DEFAULT_CLIENT_ENDPOINT: &str = "http://127.0.0.1:8080/search";
const DEFAULT_DEBOUNCE_MS: u64 = 300;

pub const ENV_CATALOG_URL: &str = "SUPABASE_URL";
pub const ENV_CATALOG_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";
pub const ENV_EMBEDDING_KEY: &str = "OPENAI_API_KEY";

/// Which search policy the search endpoint runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Case-insensitive substring filter over the built-in grocery list.
    Substring,
    /// Embed the query and rank the catalog by vector distance.
    #[default]
    Semantic,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub mode: SearchMode,

    /// Limit used by semantic search when the request has none
    #[serde(default = "default_semantic_limit")]
    pub default_limit: i64,

    /// Limit used by substring search when the request has none
    #[serde(default = "default_substring_limit")]
    pub substring_default_limit: i64,

    #[serde(default = "default_max_limit")]
    pub max_limit: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            default_limit: default_semantic_limit(),
            substring_default_limit: default_substring_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_semantic_limit() -> i64 {
    20
}

fn default_substring_limit() -> i64 {
    10
}

fn default_max_limit() -> i64 {
    50
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingsConfig {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Expected vector length. Responses of any other length are rejected.
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: Option<usize>,

    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_embedding_base_url() -> String {
    DEFAULT_EMBEDDING_BASE_URL.to_string()
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_dimensions() -> Option<usize> {
    Some(DEFAULT_EMBEDDING_DIMENSIONS)
}

fn default_embedding_timeout_secs() -> u64 {
    DEFAULT_EMBEDDING_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_products_table")]
    pub table: String,

    /// Server-side function that ranks products by vector distance
    #[serde(default = "default_rank_function")]
    pub rank_function: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            table: default_products_table(),
            rank_function: default_rank_function(),
        }
    }
}

fn default_products_table() -> String {
    DEFAULT_PRODUCTS_TABLE.to_string()
}

fn default_rank_function() -> String {
    DEFAULT_RANK_FUNCTION.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackfillConfig {
    #[serde(default = "default_batch_size")]
    pub default_batch_size: i64,

    #[serde(default = "max_batch_size")]
    pub max_batch_size: i64,

    /// Pause between records, bounds the outbound request rate
    #[serde(default = "default_record_delay_ms")]
    pub record_delay_ms: u64,

    /// Retries after the first failed embedding attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            default_batch_size: default_batch_size(),
            max_batch_size: max_batch_size(),
            record_delay_ms: default_record_delay_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

fn default_batch_size() -> i64 {
    50
}

fn max_batch_size() -> i64 {
    200
}

fn default_record_delay_ms() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_client_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_substring_limit")]
    pub limit: i64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_client_endpoint(),
            debounce_ms: default_debounce_ms(),
            limit: default_substring_limit(),
        }
    }
}

fn default_client_endpoint() -> String {
    DEFAULT_CLIENT_ENDPOINT.to_string()
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let search = &self.search;
        if search.max_limit < 1 {
            bail!("search.max_limit must be at least 1, got {}", search.max_limit);
        }
        if !(1..=search.max_limit).contains(&search.default_limit) {
            bail!(
                "search.default_limit must be between 1 and {}, got {}",
                search.max_limit,
                search.default_limit
            );
        }
        if !(1..=search.max_limit).contains(&search.substring_default_limit) {
            bail!(
                "search.substring_default_limit must be between 1 and {}, got {}",
                search.max_limit,
                search.substring_default_limit
            );
        }

        let backfill = &self.backfill;
        if backfill.max_batch_size < 1 {
            bail!(
                "backfill.max_batch_size must be at least 1, got {}",
                backfill.max_batch_size
            );
        }
        if !(1..=backfill.max_batch_size).contains(&backfill.default_batch_size) {
            bail!(
                "backfill.default_batch_size must be between 1 and {}, got {}",
                backfill.max_batch_size,
                backfill.default_batch_size
            );
        }

        if self.embeddings.model.trim().is_empty() {
            bail!("embeddings.model must not be empty");
        }
        if self.embeddings.timeout_secs == 0 {
            bail!("embeddings.timeout_secs must be greater than 0");
        }
        if self.embeddings.dimensions == Some(0) {
            bail!("embeddings.dimensions must be greater than 0");
        }

        if self.catalog.table.trim().is_empty() || self.catalog.rank_function.trim().is_empty() {
            bail!("catalog.table and catalog.rank_function must not be empty");
        }

        Ok(())
    }

    pub fn load_with(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base_path = base_path.as_ref();
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            std::fs::create_dir_all(base_path)
                .with_context(|| format!("failed to create {}", base_path.display()))?;
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::info!("wrote default config to {}", path.display());
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", path.display()))?;

        config.validate()?;

        Ok(config)
    }
}

/// Secrets for the catalog store and the embedding provider.
///
/// Read from the environment only, never from `config.yaml`.
#[derive(Clone, Default)]
pub struct Credentials {
    pub catalog_url: Option<String>,
    pub catalog_key: Option<String>,
    pub embedding_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Credentials {{ catalog_url: {:?}, catalog_key: {}, embedding_key: {} }}",
            self.catalog_url,
            redact(&self.catalog_key),
            redact(&self.embedding_key)
        )
    }
}

fn redact(secret: &Option<String>) -> &'static str {
    match secret {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

/// Everything the semantic pipeline needs once credentials are checked.
#[derive(Clone)]
pub struct ResolvedCredentials {
    pub catalog_url: String,
    pub catalog_key: String,
    pub embedding_key: String,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            catalog_url: read_env(ENV_CATALOG_URL),
            catalog_key: read_env(ENV_CATALOG_KEY),
            embedding_key: read_env(ENV_EMBEDDING_KEY),
        }
    }

    /// Fails with `Misconfigured` naming every missing variable.
    pub fn require(&self) -> Result<ResolvedCredentials, AppError> {
        let missing = [
            (ENV_CATALOG_URL, &self.catalog_url),
            (ENV_CATALOG_KEY, &self.catalog_key),
            (ENV_EMBEDDING_KEY, &self.embedding_key),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect::<Vec<_>>();

        match (&self.catalog_url, &self.catalog_key, &self.embedding_key) {
            (Some(catalog_url), Some(catalog_key), Some(embedding_key)) => {
                Ok(ResolvedCredentials {
                    catalog_url: catalog_url.clone(),
                    catalog_key: catalog_key.clone(),
                    embedding_key: embedding_key.clone(),
                })
            }
            _ => Err(AppError::Misconfigured(missing.join(", "))),
        }
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
