//! Product search.
//!
//! A request is validated in a fixed order (method, body, query, limit) and
//! then answered by exactly one backend, chosen by `search.mode`:
//!
//! - `SemanticSearch`: embed the query, rank the catalog by vector distance
//! - `SubstringSearch`: case-insensitive substring filter over a fixed list

mod similarity;
mod substring;

use std::sync::Arc;

use axum::{body::Bytes, http::Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    app::errors::AppError,
    config::{SearchConfig, SearchMode},
    embeddings::EmbeddingClient,
};

pub use similarity::SimilaritySearchService;
pub use substring::SubstringSearch;

/// Shortest accepted query, counted in characters after trimming.
pub const MIN_QUERY_CHARS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: i64,
    pub name: String,
    pub price_cents: Option<i64>,
    pub distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

/// An inbound request before any validation.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: Method,
    pub body: Bytes,
}

impl RawRequest {
    pub fn post(body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSearch {
    pub query: String,
    pub limit: usize,
}

/// Coerces a JSON number or numeric string to an integer.
///
/// Fractions are truncated. Anything non-numeric or non-finite yields `None`.
pub fn coerce_integer(value: Option<&Value>) -> Option<i64> {
    let number = match value? {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };

    number.is_finite().then(|| number.trunc() as i64)
}

/// The limit actually used downstream, always within `[1, max]`.
pub fn effective_limit(value: Option<&Value>, default: i64, max: i64) -> usize {
    coerce_integer(value).unwrap_or(default).clamp(1, max.max(1)) as usize
}

pub fn validate(
    request: &RawRequest,
    default_limit: i64,
    max_limit: i64,
) -> Result<ValidatedSearch, AppError> {
    if request.method != Method::POST {
        return Err(AppError::MethodNotAllowed);
    }

    let body: Value = serde_json::from_slice(&request.body)
        .map_err(|err| AppError::MalformedRequest(err.to_string()))?;
    let body = body
        .as_object()
        .ok_or_else(|| AppError::MalformedRequest("expected a JSON object".to_string()))?;

    let query = body
        .get("q")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|query| query.chars().count() >= MIN_QUERY_CHARS)
        .ok_or(AppError::QueryTooShort)?;

    Ok(ValidatedSearch {
        query: query.to_string(),
        limit: effective_limit(body.get("limit"), default_limit, max_limit),
    })
}

/// Embedding-backed search: query text → vector → ranked catalog rows.
#[derive(Clone)]
pub struct SemanticSearch {
    embedder: Arc<dyn EmbeddingClient>,
    similarity: SimilaritySearchService,
}

impl SemanticSearch {
    pub fn new(embedder: Arc<dyn EmbeddingClient>, similarity: SimilaritySearchService) -> Self {
        Self {
            embedder,
            similarity,
        }
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, AppError> {
        let vector = self.embedder.embed(query).await?;
        Ok(self.similarity.search(&vector, limit).await?)
    }
}

#[derive(Clone)]
pub enum SearchBackend {
    Substring(SubstringSearch),
    Semantic(SemanticSearch),
}

impl SearchBackend {
    pub fn mode(&self) -> SearchMode {
        match self {
            SearchBackend::Substring(_) => SearchMode::Substring,
            SearchBackend::Semantic(_) => SearchMode::Semantic,
        }
    }
}

#[derive(Clone)]
pub struct SearchRequestHandler {
    /// `Err` carries what is missing when the configured backend could not be built.
    backend: Result<SearchBackend, String>,
    default_limit: i64,
    max_limit: i64,
}

impl SearchRequestHandler {
    pub fn new(config: &SearchConfig, backend: SearchBackend) -> Self {
        Self::with_backend(config, backend.mode(), Ok(backend))
    }

    /// A handler whose backend is missing configuration. Requests still get
    /// validated, then fail with `Misconfigured`.
    pub fn misconfigured(config: &SearchConfig, missing: impl Into<String>) -> Self {
        Self::with_backend(config, config.mode, Err(missing.into()))
    }

    fn with_backend(
        config: &SearchConfig,
        mode: SearchMode,
        backend: Result<SearchBackend, String>,
    ) -> Self {
        let default_limit = match mode {
            SearchMode::Semantic => config.default_limit,
            SearchMode::Substring => config.substring_default_limit,
        };

        Self {
            backend,
            default_limit,
            max_limit: config.max_limit,
        }
    }

    pub async fn handle(&self, request: RawRequest) -> Result<SearchResponse, AppError> {
        let ValidatedSearch { query, limit } =
            validate(&request, self.default_limit, self.max_limit)?;

        let backend = self
            .backend
            .as_ref()
            .map_err(|missing| AppError::Misconfigured(missing.clone()))?;

        log::info!("searching for {query:?} with limit {limit}");

        let results = match backend {
            SearchBackend::Substring(substring) => substring.search(&query, limit),
            SearchBackend::Semantic(semantic) => semantic.search(&query, limit).await?,
        };

        log::info!("found {} results", results.len());

        Ok(SearchResponse { results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post(body: Value) -> RawRequest {
        RawRequest::post(body.to_string())
    }

    #[test]
    fn coerces_numbers_and_numeric_strings() {
        assert_eq!(coerce_integer(Some(&json!(7))), Some(7));
        assert_eq!(coerce_integer(Some(&json!(7.9))), Some(7));
        assert_eq!(coerce_integer(Some(&json!("12"))), Some(12));
        assert_eq!(coerce_integer(Some(&json!(" 3 "))), Some(3));
        assert_eq!(coerce_integer(Some(&json!("-4"))), Some(-4));
        assert_eq!(coerce_integer(Some(&json!("lots"))), None);
        assert_eq!(coerce_integer(Some(&json!("NaN"))), None);
        assert_eq!(coerce_integer(Some(&json!("inf"))), None);
        assert_eq!(coerce_integer(Some(&json!(null))), None);
        assert_eq!(coerce_integer(Some(&json!([5]))), None);
        assert_eq!(coerce_integer(None), None);
    }

    #[test]
    fn effective_limit_stays_in_range() {
        assert_eq!(effective_limit(Some(&json!(0)), 20, 50), 1);
        assert_eq!(effective_limit(Some(&json!(-10)), 20, 50), 1);
        assert_eq!(effective_limit(Some(&json!(51)), 20, 50), 50);
        assert_eq!(effective_limit(Some(&json!("999")), 20, 50), 50);
        assert_eq!(effective_limit(Some(&json!(25)), 20, 50), 25);
        assert_eq!(effective_limit(Some(&json!("abc")), 20, 50), 20);
        assert_eq!(effective_limit(None, 20, 50), 20);
    }

    #[test]
    fn validation_order() {
        let get = RawRequest {
            method: Method::GET,
            body: Bytes::from_static(b"not json"),
        };
        assert!(matches!(validate(&get, 20, 50), Err(AppError::MethodNotAllowed)));

        let garbage = RawRequest::post("{not json");
        assert!(matches!(
            validate(&garbage, 20, 50),
            Err(AppError::MalformedRequest(_))
        ));

        assert!(matches!(
            validate(&post(json!(["q", "milk"])), 20, 50),
            Err(AppError::MalformedRequest(_))
        ));

        assert!(matches!(
            validate(&post(json!({"q": " m ", "limit": "bad"})), 20, 50),
            Err(AppError::QueryTooShort)
        ));
    }

    #[test]
    fn query_must_be_text_of_two_chars() {
        for body in [
            json!({}),
            json!({"q": 42}),
            json!({"q": ""}),
            json!({"q": "   "}),
            json!({"q": "a"}),
            json!({"q": "\t é \n"}),
        ] {
            assert!(
                matches!(validate(&post(body.clone()), 20, 50), Err(AppError::QueryTooShort)),
                "{body} should be rejected"
            );
        }

        let ok = validate(&post(json!({"q": "  oat milk  ", "limit": "5"})), 20, 50).unwrap();
        assert_eq!(
            ok,
            ValidatedSearch {
                query: "oat milk".to_string(),
                limit: 5
            }
        );
    }

    #[test]
    fn substring_mode_uses_its_own_default_limit() {
        let config = SearchConfig::default();
        let handler =
            SearchRequestHandler::new(&config, SearchBackend::Substring(SubstringSearch::new()));
        assert_eq!(handler.default_limit, 10);

        let handler = SearchRequestHandler::misconfigured(&config, "OPENAI_API_KEY");
        assert_eq!(handler.default_limit, 20);
    }
}
