use std::sync::Arc;

use super::SearchResult;
use crate::{
    app::errors::UpstreamError,
    catalog::{CatalogStore, RankedProduct},
};

/// Ranks catalog products against a query vector.
///
/// Only an interface boundary: the distance metric and the index belong to
/// the catalog store's ranking function.
#[derive(Clone)]
pub struct SimilaritySearchService {
    catalog: Arc<dyn CatalogStore>,
    max_limit: usize,
}

impl SimilaritySearchService {
    pub fn new(catalog: Arc<dyn CatalogStore>, max_limit: usize) -> Self {
        Self {
            catalog,
            max_limit: max_limit.max(1),
        }
    }

    /// Results in the order the store returned them. `limit` is clamped to
    /// `[1, max_limit]`, never rejected.
    pub async fn search(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>, UpstreamError> {
        let limit = limit.clamp(1, self.max_limit);
        let rows = self.catalog.rank(vector, limit).await?;

        Ok(rows.into_iter().map(SearchResult::from).collect())
    }
}

impl From<RankedProduct> for SearchResult {
    fn from(row: RankedProduct) -> Self {
        SearchResult {
            id: row.id,
            name: row.name,
            price_cents: row.price_cents,
            distance: row.distance,
        }
    }
}
