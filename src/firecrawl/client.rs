use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use super::types::{Document, ScrapeOptions, ScrapedPage, SearchRequest, SearchResponse};
use crate::config::FirecrawlConfig;
use crate::provider::retry::with_retries;
use crate::provider::{
    ApiKey, ProviderError, ProviderPayload, RetryPolicy, SearchProvider, ensure_success,
};

const API_BASE: &str = "https://api.firecrawl.dev";
const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
const TOP_RELEVANCE: u8 = 95;
const RELEVANCE_STEP: u8 = 5;
const MIN_RELEVANCE: u8 = 50;

#[derive(Clone)]
pub struct FirecrawlClient {
    http: Client,
    api_key: ApiKey,
    limit: u32,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl FirecrawlClient {
    pub fn from_config(http: Client, config: &FirecrawlConfig) -> Result<Self, ProviderError> {
        let api_key = ApiKey::parse(config.api_key.as_deref())
            .ok_or(ProviderError::ApiKeyNotSet("FIRECRAWL_API_KEY"))?;
        Ok(Self {
            http,
            api_key,
            limit: config.limit,
            base_url: API_BASE.to_string(),
            timeout: config.timeout,
            retry: RetryPolicy::new(config.max_retries, INITIAL_BACKOFF),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            api_key: ApiKey::for_tests(),
            limit: 3,
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(0, Duration::from_millis(1)),
        }
    }

    async fn search_and_scrape(&self, query: &str) -> Result<SearchResponse, ProviderError> {
        let url = format!("{}/v1/search", self.base_url);
        let request = SearchRequest {
            query: query.to_string(),
            limit: self.limit,
            scrape_options: ScrapeOptions {
                formats: vec!["markdown"],
                only_main_content: true,
            },
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .header("User-Agent", crate::USER_AGENT)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?;

        let body: SearchResponse = ensure_success(response, "firecrawl").await?.json().await?;
        if !body.success {
            let message = body
                .error
                .unwrap_or_else(|| "search reported failure".to_string());
            warn!(error = %message, "Firecrawl search failed");
            return Err(ProviderError::InvalidResponse(message));
        }

        debug!(results = body.data.len(), "firecrawl search complete");
        Ok(body)
    }
}

impl SearchProvider for FirecrawlClient {
    async fn search(&self, query: &str) -> Result<ProviderPayload, ProviderError> {
        let response =
            with_retries(self.retry, "firecrawl", move || self.search_and_scrape(query)).await?;
        Ok(ProviderPayload::Pages(to_pages(response.data)))
    }
}

/// Drops documents without a usable URL; relevance decays with rank.
pub(crate) fn to_pages(documents: Vec<Document>) -> Vec<ScrapedPage> {
    documents
        .into_iter()
        .filter_map(|doc| {
            let metadata = doc.metadata;
            let url = doc
                .url
                .filter(|u| !u.is_empty())
                .or_else(|| metadata.as_ref().and_then(|m| m.source_url.clone()))
                .filter(|u| !u.is_empty())?;
            let (metadata_title, metadata_description) = metadata
                .map(|m| (m.title, m.description))
                .unwrap_or_default();
            Some(ScrapedPage {
                url,
                title: doc.title.filter(|t| !t.trim().is_empty()),
                metadata_title: metadata_title.filter(|t| !t.trim().is_empty()),
                description: doc
                    .description
                    .or(metadata_description)
                    .filter(|d| !d.trim().is_empty()),
                markdown: doc.markdown.filter(|m| !m.trim().is_empty()),
                relevance: 0,
            })
        })
        .enumerate()
        .map(|(rank, mut page)| {
            page.relevance = rank_relevance(rank);
            page
        })
        .collect()
}

fn rank_relevance(rank: usize) -> u8 {
    let penalty = (rank as u64 * RELEVANCE_STEP as u64).min(u8::MAX as u64) as u8;
    TOP_RELEVANCE.saturating_sub(penalty).max(MIN_RELEVANCE)
}
