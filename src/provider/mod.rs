//! Shared plumbing for the external AI/search adapters: error classification,
//! retry policy, API key handling and the traits the orchestrator and
//! workflow are written against.

pub(crate) mod retry;

use std::fmt;
use std::future::Future;

use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::firecrawl::types::ScrapedPage;
use crate::perplexity::types::SearchAnswer;

pub use retry::RetryPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{0} not set")]
    ApiKeyNotSet(&'static str),

    #[error("API rate limit exceeded. Please retry later.")]
    RateLimited,

    #[error("API quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// The search providers an operation fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Perplexity,
    Firecrawl,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Perplexity => "perplexity",
            ProviderKind::Firecrawl => "firecrawl",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Failed,
}

/// Provider-specific search output. Each variant is normalized by its own
/// function in the results processor.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProviderPayload {
    /// Free-text answer from a search LLM.
    Answer(SearchAnswer),
    /// Ranked list of scraped pages.
    Pages(Vec<ScrapedPage>),
}

/// A search backend invoked once per query by the orchestrator.
/// Implemented by `PerplexityClient` and `FirecrawlClient`; mocks in tests.
pub trait SearchProvider {
    fn search(
        &self,
        query: &str,
    ) -> impl Future<Output = Result<ProviderPayload, ProviderError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

/// Text generation used for research planning and answer synthesis.
pub trait LanguageModel {
    fn generate(
        &self,
        prompt: &str,
        format: ResponseFormat,
    ) -> impl Future<Output = Result<String, ProviderError>> + Send;
}

#[derive(Clone)]
pub(crate) struct ApiKey(String);

impl ApiKey {
    /// Returns `None` for missing or blank keys.
    pub(crate) fn parse(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| Self(k.to_string()))
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self("test-key".to_string())
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

pub(crate) fn classify_api_error(code: Option<u16>, message: Option<String>) -> ProviderError {
    let message = message.unwrap_or_else(|| "Unknown error".to_string());

    match code {
        Some(429) => ProviderError::RateLimited,
        Some(402 | 403) => ProviderError::QuotaExhausted(message),
        Some(code) => ProviderError::Api { code, message },
        None => ProviderError::Api {
            code: 0,
            message: format!("Unknown error (no status code): {message}"),
        },
    }
}

/// Passes successful responses through; classifies everything else using the
/// JSON error body when one is present.
pub(crate) async fn ensure_success(
    response: Response,
    provider: &'static str,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!(provider, "API rate limited");
        return Err(ProviderError::RateLimited);
    }
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = error_message(&text).unwrap_or_else(|| {
        let end = text.floor_char_boundary(200);
        format!("HTTP {status}: {}", &text[..end])
    });
    let classified = classify_api_error(Some(status.as_u16()), Some(message));
    warn!(provider, error = %classified, "API error");
    Err(classified)
}

/// Pulls a human-readable message out of the common error body shapes:
/// `{"error": {"message": ..}}`, `{"error": ".."}` and `{"message": ..}`.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let from_error = match value.get("error") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Object(obj)) => obj
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string),
        _ => None,
    };
    from_error.or_else(|| {
        value
            .get("message")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    })
}
