use crate::core::models::item::ItemRecord;
use async_trait::async_trait;
use thiserror::Error;

/// Hard cap on results returned for a single query
pub const MAX_SEARCH_RESULTS: usize = 20;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("search returned http {0}")]
    Status(u16),
    #[error("failed to decode search response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid search endpoint: {0}")]
    Url(#[from] url::ParseError),
}

/// Free text book search, results in provider order
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<ItemRecord>, SearchError>;
}

/// Fixed result list, handy for offline runs and tests
#[derive(Debug, Clone, Default)]
pub struct StaticSearch {
    items: Vec<ItemRecord>,
}

impl StaticSearch {
    pub fn new(items: Vec<ItemRecord>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, _query: &str) -> Result<Vec<ItemRecord>, SearchError> {
        Ok(self
            .items
            .iter()
            .take(MAX_SEARCH_RESULTS)
            .cloned()
            .collect())
    }
}
