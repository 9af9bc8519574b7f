//! Product catalog store.
//!
//! The catalog lives in a Postgres database fronted by a PostgREST-style API
//! (Supabase). Vector ranking is a server-side function; this side only
//! passes the query vector and a row count.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;

use crate::{
    app::errors::UpstreamError, config::CatalogConfig, embeddings::EmbeddingVector,
};

const SERVICE: &str = "catalog store";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingVector>,
}

/// A row returned by the ranking function, closest first.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RankedProduct {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub distance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct UpdatedRow {
    id: i64,
}

/// Reads and writes the shared product catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Up to `limit` records whose embedding is unset.
    async fn fetch_unembedded(&self, limit: usize) -> Result<Vec<ProductRecord>, UpstreamError>;

    /// Stores `embedding` only while the record has none. Returns `false`
    /// when nothing was written because the record was already embedded.
    async fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<bool, UpstreamError>;

    /// Rows ordered by ascending vector distance to `vector`.
    async fn rank(&self, vector: &[f32], limit: usize)
        -> Result<Vec<RankedProduct>, UpstreamError>;
}

pub struct PostgrestCatalog {
    client: reqwest::Client,
    rest_url: url::Url,
    table: String,
    rank_function: String,
}

impl PostgrestCatalog {
    pub fn new(base_url: &str, service_key: &str, config: &CatalogConfig) -> anyhow::Result<Self> {
        let base = url::Url::parse(&format!("{}/", base_url.trim().trim_end_matches('/')))?;
        let rest_url = base.join("rest/v1/")?;

        let mut headers = HeaderMap::new();
        let mut apikey = HeaderValue::from_str(service_key.trim())
            .map_err(|_| anyhow::anyhow!("catalog key is not a valid header value"))?;
        apikey.set_sensitive(true);
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", service_key.trim()))
            .map_err(|_| anyhow::anyhow!("catalog key is not a valid header value"))?;
        bearer.set_sensitive(true);
        headers.insert("apikey", apikey);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            rest_url,
            table: config.table.clone(),
            rank_function: config.rank_function.clone(),
        })
    }

    fn table_url(&self) -> Result<url::Url, UpstreamError> {
        self.rest_url
            .join(&self.table)
            .map_err(|err| UpstreamError::malformed(SERVICE, err.to_string()))
    }

    fn rpc_url(&self) -> Result<url::Url, UpstreamError> {
        self.rest_url
            .join(&format!("rpc/{}", self.rank_function))
            .map_err(|err| UpstreamError::malformed(SERVICE, err.to_string()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(UpstreamError::Status {
        service: SERVICE,
        status,
        body,
    })
}

async fn read_rows<T>(response: reqwest::Response) -> Result<Vec<T>, UpstreamError>
where
    T: DeserializeOwned,
{
    check_status(response)
        .await?
        .json::<Vec<T>>()
        .await
        .map_err(|err| UpstreamError::malformed(SERVICE, err.to_string()))
}

#[async_trait]
impl CatalogStore for PostgrestCatalog {
    async fn fetch_unembedded(&self, limit: usize) -> Result<Vec<ProductRecord>, UpstreamError> {
        let limit = limit.to_string();
        let response = self
            .client
            .get(self.table_url()?)
            .query(&[
                ("select", "id,name"),
                ("embedding", "is.null"),
                ("order", "id.asc"),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(UpstreamError::transport(SERVICE))?;

        read_rows(response).await
    }

    async fn set_embedding(&self, id: i64, embedding: &[f32]) -> Result<bool, UpstreamError> {
        let id_filter = format!("eq.{id}");
        let response = self
            .client
            .patch(self.table_url()?)
            // set only if still unset, echo back the ids actually updated
            .query(&[
                ("id", id_filter.as_str()),
                ("embedding", "is.null"),
                ("select", "id"),
            ])
            .header("Prefer", "return=representation")
            .json(&json!({ "embedding": embedding }))
            .send()
            .await
            .map_err(UpstreamError::transport(SERVICE))?;

        let updated: Vec<UpdatedRow> = read_rows(response).await?;
        Ok(updated.iter().any(|row| row.id == id))
    }

    async fn rank(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RankedProduct>, UpstreamError> {
        let response = self
            .client
            .post(self.rpc_url()?)
            .json(&json!({
                "query_embedding": vector,
                "match_count": limit,
            }))
            .send()
            .await
            .map_err(UpstreamError::transport(SERVICE))?;

        read_rows(response).await
    }
}
