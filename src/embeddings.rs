//! Embedding provider client.
//!
//! Converts text to a fixed-length vector through an OpenAI-compatible
//! `/embeddings` endpoint. One outbound request per call, no retries here:
//! callers that want retries wrap `embed` themselves.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::{app::errors::UpstreamError, config::EmbeddingsConfig};

const SERVICE: &str = "embedding provider";

/// Ordered embedding components. Length is fixed by the model.
pub type EmbeddingVector = Vec<f32>;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, UpstreamError>;
}

/// Embeddings client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, config: &EmbeddingsConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing embedding API key");

        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| anyhow::anyhow!("embedding API key is not a valid header value"))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, UpstreamError> {
        let request = EmbeddingRequest {
            input: text,
            model: &self.model,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(UpstreamError::transport(SERVICE))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(UpstreamError::Status {
                service: SERVICE,
                status,
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| UpstreamError::malformed(SERVICE, err.to_string()))?;

        first_embedding(parsed, self.dimensions)
    }
}

fn first_embedding(
    response: EmbeddingResponse,
    dimensions: Option<usize>,
) -> Result<EmbeddingVector, UpstreamError> {
    let embedding = response
        .data
        .into_iter()
        .next()
        .map(|entry| entry.embedding)
        .ok_or_else(|| UpstreamError::malformed(SERVICE, "no embedding returned"))?;

    if embedding.is_empty() {
        return Err(UpstreamError::malformed(SERVICE, "empty embedding"));
    }

    match dimensions {
        Some(expected) if embedding.len() != expected => Err(UpstreamError::malformed(
            SERVICE,
            format!("expected {expected} dimensions, got {}", embedding.len()),
        )),
        _ => Ok(embedding),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn response(json: serde_json::Value) -> EmbeddingResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn request_body_matches_provider_format() {
        let body = serde_json::to_value(EmbeddingRequest {
            input: "oat milk",
            model: "text-embedding-3-small",
        })
        .unwrap();

        assert_eq!(
            body,
            serde_json::json!({"input": "oat milk", "model": "text-embedding-3-small"})
        );
    }

    #[test]
    fn uses_first_embedding() {
        let parsed = response(serde_json::json!({
            "data": [
                {"embedding": [0.1, 0.2, 0.3], "index": 0},
                {"embedding": [0.9, 0.9, 0.9], "index": 1}
            ],
            "model": "text-embedding-3-small"
        }));

        assert_eq!(first_embedding(parsed, Some(3)).unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn empty_data_is_malformed() {
        let parsed = response(serde_json::json!({"data": []}));
        assert!(matches!(
            first_embedding(parsed, None),
            Err(UpstreamError::Malformed { .. })
        ));
    }

    #[test]
    fn wrong_dimensions_are_malformed() {
        let parsed = response(serde_json::json!({"data": [{"embedding": [0.5, 0.5]}]}));
        let err = first_embedding(parsed, Some(1536)).unwrap_err();
        assert!(err.to_string().contains("expected 1536 dimensions, got 2"));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let config = EmbeddingsConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..Default::default()
        };
        let embedder = OpenAiEmbedder::new("sk-test", &config).unwrap();
        assert_eq!(embedder.endpoint(), "http://localhost:11434/v1/embeddings");
    }

    #[test]
    fn blank_key_is_rejected() {
        assert!(OpenAiEmbedder::new("  ", &EmbeddingsConfig::default()).is_err());
    }

    fn embedder_for(base_url: &str) -> OpenAiEmbedder {
        let config = EmbeddingsConfig {
            base_url: base_url.to_string(),
            dimensions: Some(3),
            ..Default::default()
        };
        OpenAiEmbedder::new("sk-test", &config).unwrap()
    }

    #[tokio::test]
    async fn posts_input_and_model_with_bearer_auth() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/embeddings")
                    .header("authorization", "Bearer sk-test")
                    .header("content-type", "application/json")
                    .json_body(json!({"input": "oat milk", "model": "text-embedding-3-small"}));
                then.status(200)
                    .json_body(json!({"data": [{"embedding": [0.25, 0.5, 1.0], "index": 0}]}));
            })
            .await;

        let embedding = embedder_for(&server.base_url())
            .embed("oat milk")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(embedding, vec![0.25, 0.5, 1.0]);
    }

    #[tokio::test]
    async fn error_status_keeps_code_and_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(429).body("rate limit reached");
            })
            .await;

        let err = embedder_for(&server.base_url())
            .embed("coffee beans")
            .await
            .unwrap_err();

        match err {
            UpstreamError::Status { status, body, .. } => {
                assert_eq!(status, reqwest::StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(body, "rate limit reached");
            }
            other => panic!("expected a status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_reply_is_malformed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200).body("<html>gateway</html>");
            })
            .await;

        let err = embedder_for(&server.base_url())
            .embed("rice")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed { .. }));
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_error() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let err = embedder_for(&format!("http://127.0.0.1:{port}"))
            .embed("rice")
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Transport { .. }));
    }
}
