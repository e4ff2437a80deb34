use std::collections::HashSet;
use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use super::types::{ChatMessage, ChatRequest, ChatResponse, Citation, SearchAnswer};
use crate::config::PerplexityConfig;
use crate::provider::retry::with_retries;
use crate::provider::{
    ApiKey, Confidence, ProviderError, ProviderPayload, RetryPolicy, SearchProvider,
    ensure_success,
};

const API_BASE: &str = "https://api.perplexity.ai";
const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
const SYSTEM_PROMPT: &str = "You are a financial research assistant. Answer with current, \
factual data (figures, dates, institutions) and cite your sources. Be concise.";

#[derive(Clone)]
pub struct PerplexityClient {
    http: Client,
    api_key: ApiKey,
    model: String,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl PerplexityClient {
    pub fn from_config(http: Client, config: &PerplexityConfig) -> Result<Self, ProviderError> {
        let api_key = ApiKey::parse(config.api_key.as_deref())
            .ok_or(ProviderError::ApiKeyNotSet("PERPLEXITY_API_KEY"))?;
        Ok(Self {
            http,
            api_key,
            model: config.model.clone(),
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
            model: crate::config::DEFAULT_PERPLEXITY_MODEL.to_string(),
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(0, Duration::from_millis(1)),
        }
    }

    async fn complete(&self, query: &str) -> Result<ChatResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: query.to_string(),
                },
            ],
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

        let body: ChatResponse = ensure_success(response, "perplexity").await?.json().await?;
        debug!(model = %self.model, id = %body.id, "perplexity search complete");
        Ok(body)
    }
}

impl SearchProvider for PerplexityClient {
    async fn search(&self, query: &str) -> Result<ProviderPayload, ProviderError> {
        let response = with_retries(self.retry, "perplexity", move || self.complete(query)).await?;
        to_answer(response).map(ProviderPayload::Answer)
    }
}

/// Cited answers are rated high confidence; uncited ones medium.
pub(crate) fn to_answer(response: ChatResponse) -> Result<SearchAnswer, ProviderError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| ProviderError::InvalidResponse("Perplexity returned an empty answer".into()))?;

    let mut seen = HashSet::new();
    let titled = response.search_results.into_iter().filter_map(|r| {
        let url = r.url.filter(|u| !u.is_empty())?;
        Some(Citation {
            url,
            title: r.title.filter(|t| !t.is_empty()),
        })
    });
    let plain = response
        .citations
        .into_iter()
        .filter(|u| !u.is_empty())
        .map(|url| Citation { url, title: None });
    let citations: Vec<Citation> = titled
        .chain(plain)
        .filter(|c| seen.insert(c.url.clone()))
        .collect();

    let confidence = if citations.is_empty() {
        Confidence::Medium
    } else {
        Confidence::High
    };

    Ok(SearchAnswer {
        id: response.id,
        content,
        citations,
        confidence,
    })
}
