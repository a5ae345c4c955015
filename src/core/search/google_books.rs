use crate::app::config::SearchConfig;
use crate::core::models::item::ItemRecord;
use crate::core::search::provider::{SearchError, SearchProvider};
use crate::core::tls;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, redirect};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

#[derive(Debug, Default, Deserialize)]
struct VolumesResponse {
    #[serde(default)]
    items: Vec<Value>,
}

/// Google books volume search over http
pub struct GoogleBooksSearch {
    client: Client,
    endpoint: Url,
    max_results: usize,
    default_query: String,
}

impl GoogleBooksSearch {
    /// Builds the http client eagerly so a bad endpoint or tls
    /// setup fails on startup rather than on first search
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        tls::install_crypto_provider();

        let client = reqwest::ClientBuilder::new()
            .user_agent("shelf")
            .connect_timeout(Duration::from_secs(2))
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .redirect(redirect::Policy::limited(2))
            .timeout(config.timeout)
            .deflate(true)
            .gzip(true)
            .hickory_dns(true)
            .build()?;

        Ok(Self {
            client,
            endpoint: Url::parse(&config.endpoint)?,
            max_results: config.effective_max_results(),
            default_query: config.default_query.clone(),
        })
    }

    fn request_url(&self, query: &str) -> Url {
        let query = match query.trim() {
            "" => self.default_query.as_str(),
            trimmed => trimmed,
        };

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("maxResults", &self.max_results.to_string());
        url
    }

    fn parse_results(&self, body: &[u8]) -> Result<Vec<ItemRecord>, SearchError> {
        let response: VolumesResponse = serde_json::from_slice(body)?;

        let mut results = Vec::with_capacity(response.items.len().min(self.max_results));
        for value in response.items {
            match ItemRecord::from_value(value) {
                Some(record) => results.push(record),
                None => warn!("Dropping search result without a volume id"),
            }

            if results.len() == self.max_results {
                break;
            }
        }

        Ok(results)
    }
}

#[async_trait]
impl SearchProvider for GoogleBooksSearch {
    #[instrument(skip_all, name = "book_search")]
    async fn search(&self, query: &str) -> Result<Vec<ItemRecord>, SearchError> {
        let url = self.request_url(query);
        debug!("Searching {}", url);

        let res = self.client.get(url).send().await?;

        let status = res.status();
        if status != StatusCode::OK {
            debug!("Non 200 search status {}", status);
            return Err(SearchError::Status(status.as_u16()));
        }

        let bytes = res.bytes().await?;
        self.parse_results(&bytes)
    }
}
