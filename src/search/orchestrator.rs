use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{join, join_all};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::combine::{CombinedResult, combine_search_results};
use super::operation::{ProviderResult, SearchStatus};
use super::registry::OperationRegistry;
use crate::config::SearchConfig;
use crate::provider::{ProviderKind, SearchProvider};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search query is empty")]
    EmptyQuery,

    #[error("no search providers are enabled")]
    NoProvidersEnabled,

    #[error("search timed out after {timeout_ms}ms: {query}")]
    Timeout { query: String, timeout_ms: u64 },

    #[error("search operation {0} is no longer tracked")]
    OperationLost(String),
}

/// Per-call overrides of the configured search behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub timeout: Option<Duration>,
    pub allow_partial: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Queries run concurrently per window.
    pub chunk_size: Option<usize>,
    /// Pause between windows.
    pub delay: Option<Duration>,
    pub search: SearchOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub batch_id: String,
    pub total: usize,
    pub successful: Vec<CombinedResult>,
    pub failed: Vec<FailedSearch>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl BatchResult {
    /// Wraps one search outcome in batch shape.
    pub fn single(query: &str, outcome: Result<CombinedResult, SearchError>, started_at: DateTime<Utc>) -> Self {
        let mut successful = Vec::new();
        let mut failed = Vec::new();
        match outcome {
            Ok(result) if result.status.is_success() => successful.push(result),
            Ok(result) => failed.push(FailedSearch::from_unusable(query, result)),
            Err(e) => failed.push(FailedSearch {
                query: query.to_string(),
                search_id: None,
                error: e.to_string(),
            }),
        }
        Self {
            batch_id: Uuid::new_v4().to_string(),
            total: 1,
            successful,
            failed,
            started_at,
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSearch {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_id: Option<String>,
    pub error: String,
}

impl FailedSearch {
    fn from_unusable(query: &str, result: CombinedResult) -> Self {
        Self {
            query: query.to_string(),
            error: result
                .failure_summary()
                .unwrap_or_else(|| format!("search ended as {}", result.status)),
            search_id: Some(result.search_id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSearch {
    pub id: String,
    pub query: String,
    pub status: SearchStatus,
    pub elapsed_ms: i64,
    pub providers_reported: Vec<ProviderKind>,
}

/// Fans each query out to every enabled provider and tracks the operation
/// in a bounded registry. A provider is enabled when it was constructed;
/// `None` means it is unconfigured or switched off.
pub struct SearchOrchestrator<P, F> {
    perplexity: Option<P>,
    firecrawl: Option<F>,
    registry: OperationRegistry,
    config: SearchConfig,
}

impl<P, F> SearchOrchestrator<P, F>
where
    P: SearchProvider + Send + Sync,
    F: SearchProvider + Send + Sync,
{
    pub fn new(perplexity: Option<P>, firecrawl: Option<F>, config: SearchConfig) -> Self {
        let registry = OperationRegistry::new(config.retention, config.registry_capacity);
        Self {
            perplexity,
            firecrawl,
            registry,
            config,
        }
    }

    pub fn enabled_providers(&self) -> Vec<ProviderKind> {
        let mut enabled = Vec::new();
        if self.perplexity.is_some() {
            enabled.push(ProviderKind::Perplexity);
        }
        if self.firecrawl.is_some() {
            enabled.push(ProviderKind::Firecrawl);
        }
        enabled
    }

    /// Queries every enabled provider concurrently, bounded by the search
    /// timeout. Provider failures are captured per provider; the call fails
    /// only when nothing can be searched or the timeout leaves nothing usable.
    pub async fn execute_parallel_search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<CombinedResult, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if self.perplexity.is_none() && self.firecrawl.is_none() {
            return Err(SearchError::NoProvidersEnabled);
        }
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let allow_partial = options.allow_partial.unwrap_or(self.config.allow_partial);

        let id = self.registry.begin(query);
        self.registry.start(&id);
        info!(search_id = %id, query, "search started");

        let perplexity = self.run_provider(&id, ProviderKind::Perplexity, self.perplexity.as_ref(), query);
        let firecrawl = self.run_provider(&id, ProviderKind::Firecrawl, self.firecrawl.as_ref(), query);
        let settled = tokio::time::timeout(timeout, join(perplexity, firecrawl)).await;

        let status = match settled {
            Ok(_) if self.registry.has_result(&id) => SearchStatus::Completed,
            Ok(_) => SearchStatus::Failed,
            Err(_) if allow_partial && self.registry.has_result(&id) => {
                warn!(search_id = %id, timeout_ms, "search timed out, returning partial results");
                SearchStatus::PartialSuccess
            }
            Err(_) => {
                let op = self
                    .registry
                    .finish(&id, SearchStatus::Timeout)
                    .ok_or_else(|| SearchError::OperationLost(id.clone()))?;
                // A cancel that landed first stays the reported outcome.
                if op.status == SearchStatus::Cancelled {
                    info!(search_id = %id, "cancelled search reached its timeout");
                    return Ok(combine_search_results(&op));
                }
                warn!(search_id = %id, timeout_ms, "search timed out");
                return Err(SearchError::Timeout {
                    query: query.to_string(),
                    timeout_ms,
                });
            }
        };

        let op = self
            .registry
            .finish(&id, status)
            .ok_or_else(|| SearchError::OperationLost(id.clone()))?;
        let combined = combine_search_results(&op);
        info!(
            search_id = %id,
            status = %combined.status,
            sources = combined.sources.len(),
            results = combined.all_results.len(),
            duration_ms = combined.duration_ms,
            "search finished"
        );
        Ok(combined)
    }

    async fn run_provider<S: SearchProvider>(
        &self,
        id: &str,
        kind: ProviderKind,
        provider: Option<&S>,
        query: &str,
    ) {
        let Some(provider) = provider else {
            return;
        };
        let outcome = match provider.search(query).await {
            Ok(payload) => Ok(ProviderResult::new(kind, payload)),
            Err(e) => {
                warn!(search_id = id, provider = %kind, error = %e, "provider search failed");
                Err(e.to_string())
            }
        };
        if !self.registry.record(id, kind, outcome) {
            debug!(search_id = id, provider = %kind, "provider finished after operation ended");
        }
    }

    /// Runs queries in sequential windows of `chunk_size`, each window fully
    /// concurrent. Errors and unusable outcomes become failed entries.
    pub async fn execute_batch_search(&self, queries: &[String], options: &BatchOptions) -> BatchResult {
        let chunk_size = options.chunk_size.unwrap_or(self.config.batch_size).max(1);
        let delay = options.delay.unwrap_or(self.config.batch_delay);
        let batch_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(batch_id = %batch_id, total = queries.len(), chunk_size, "batch search started");

        let mut successful = Vec::new();
        let mut failed = Vec::new();

        for (index, window) in queries.chunks(chunk_size).enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let outcomes = join_all(
                window
                    .iter()
                    .map(|query| self.execute_parallel_search(query, &options.search)),
            )
            .await;

            for (query, outcome) in window.iter().zip(outcomes) {
                match outcome {
                    Ok(result) if result.status.is_success() => successful.push(result),
                    Ok(result) => failed.push(FailedSearch::from_unusable(query, result)),
                    Err(e) => failed.push(FailedSearch {
                        query: query.clone(),
                        search_id: None,
                        error: e.to_string(),
                    }),
                }
            }
        }

        info!(
            batch_id = %batch_id,
            successful = successful.len(),
            failed = failed.len(),
            "batch search finished"
        );
        BatchResult {
            batch_id,
            total: queries.len(),
            successful,
            failed,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Advisory cancel; in-flight provider calls keep running but their
    /// results are discarded. Returns whether the id is known.
    pub fn cancel_search(&self, id: &str) -> bool {
        self.registry.cancel(id)
    }

    pub fn active_searches(&self) -> Vec<ActiveSearch> {
        let now = Utc::now();
        self.registry
            .snapshot()
            .into_iter()
            .map(|op| ActiveSearch {
                elapsed_ms: op.elapsed_ms(now),
                providers_reported: op.reported_providers(),
                id: op.id,
                query: op.query,
                status: op.status,
            })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::firecrawl::types::ScrapedPage;
    use crate::perplexity::types::{Citation, SearchAnswer};
    use crate::provider::{Confidence, ProviderError, ProviderPayload};

    /// Scripted provider that records call counts and peak concurrency.
    pub(crate) struct MockProvider {
        delay: Duration,
        outcome: Result<ProviderPayload, &'static str>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MockProvider {
        pub(crate) fn ok(payload: ProviderPayload) -> Self {
            Self {
                delay: Duration::from_millis(5),
                outcome: Ok(payload),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }

        pub(crate) fn failing(message: &'static str) -> Self {
            Self {
                outcome: Err(message),
                ..Self::ok(ProviderPayload::Pages(vec![]))
            }
        }

        pub(crate) fn delayed(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl SearchProvider for MockProvider {
        async fn search(&self, _query: &str) -> Result<ProviderPayload, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.outcome
                .clone()
                .map_err(|message| ProviderError::InvalidResponse(message.to_string()))
        }
    }

    pub(crate) fn answer_payload() -> ProviderPayload {
        ProviderPayload::Answer(SearchAnswer {
            id: "pplx-1".into(),
            content: "The Federal Reserve held rates at 5.25-5.50% in 2024.".into(),
            citations: vec![Citation {
                url: "https://www.federalreserve.gov/monetarypolicy.htm".into(),
                title: Some("Monetary Policy".into()),
            }],
            confidence: Confidence::High,
        })
    }

    pub(crate) fn pages_payload() -> ProviderPayload {
        ProviderPayload::Pages(vec![ScrapedPage {
            url: "https://www.reuters.com/markets/fed".into(),
            title: Some("Fed holds rates steady".into()),
            metadata_title: None,
            description: Some("The central bank kept its benchmark rate unchanged.".into()),
            markdown: Some("The Federal Reserve kept interest rates unchanged on Wednesday.".into()),
            relevance: 95,
        }])
    }

    pub(crate) fn search_config() -> SearchConfig {
        SearchConfig {
            timeout: Duration::from_secs(2),
            allow_partial: true,
            batch_size: 3,
            batch_delay: Duration::ZERO,
            retention: Duration::from_secs(60),
            registry_capacity: 100,
        }
    }

    type MockOrchestrator = SearchOrchestrator<MockProvider, MockProvider>;

    #[tokio::test]
    async fn no_providers_enabled_is_an_error() {
        let orchestrator = MockOrchestrator::new(None, None, search_config());
        let err = orchestrator
            .execute_parallel_search("fed rates", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::NoProvidersEnabled));
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let orchestrator = MockOrchestrator::new(Some(MockProvider::ok(answer_payload())), None, search_config());
        let err = orchestrator
            .execute_parallel_search("   ", &SearchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::EmptyQuery));
    }

    #[tokio::test]
    async fn sources_match_successful_providers() {
        let orchestrator = MockOrchestrator::new(
            Some(MockProvider::ok(answer_payload())),
            Some(MockProvider::failing("quota exhausted")),
            search_config(),
        );

        let result = orchestrator
            .execute_parallel_search("fed rates", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, SearchStatus::Completed);
        assert_eq!(result.sources, vec![ProviderKind::Perplexity]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].provider, ProviderKind::Firecrawl);
        assert!(result.errors[0].message.contains("quota exhausted"));
    }

    #[tokio::test]
    async fn both_providers_contribute_entries() {
        let orchestrator = MockOrchestrator::new(
            Some(MockProvider::ok(answer_payload())),
            Some(MockProvider::ok(pages_payload())),
            search_config(),
        );

        let result = orchestrator
            .execute_parallel_search("fed rates", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(result.sources, vec![ProviderKind::Perplexity, ProviderKind::Firecrawl]);
        assert_eq!(result.all_results.len(), 2);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn all_providers_failing_marks_failed() {
        let orchestrator = MockOrchestrator::new(
            Some(MockProvider::failing("boom")),
            Some(MockProvider::failing("bust")),
            search_config(),
        );

        let result = orchestrator
            .execute_parallel_search("q", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(result.status, SearchStatus::Failed);
        assert!(result.sources.is_empty());
        assert_eq!(result.errors.len(), 2);
    }

    #[tokio::test]
    async fn timeout_with_partial_result_falls_back() {
        let orchestrator = MockOrchestrator::new(
            Some(MockProvider::ok(answer_payload())),
            Some(MockProvider::ok(pages_payload()).delayed(Duration::from_secs(10))),
            search_config(),
        );
        let options = SearchOptions {
            timeout: Some(Duration::from_millis(100)),
            allow_partial: None,
        };

        let result = orchestrator.execute_parallel_search("q", &options).await.unwrap();

        assert_eq!(result.status, SearchStatus::PartialSuccess);
        assert_eq!(result.sources, vec![ProviderKind::Perplexity]);
    }

    #[tokio::test]
    async fn timeout_without_fallback_is_an_error() {
        let orchestrator = MockOrchestrator::new(
            Some(MockProvider::ok(answer_payload())),
            Some(MockProvider::ok(pages_payload()).delayed(Duration::from_secs(10))),
            search_config(),
        );
        let options = SearchOptions {
            timeout: Some(Duration::from_millis(100)),
            allow_partial: Some(false),
        };

        let err = orchestrator.execute_parallel_search("q", &options).await.unwrap_err();

        assert!(matches!(err, SearchError::Timeout { timeout_ms: 100, .. }));
        let active = orchestrator.active_searches();
        assert_eq!(active[0].status, SearchStatus::Timeout);
        assert_eq!(active[0].providers_reported, vec![ProviderKind::Perplexity]);
    }

    #[tokio::test]
    async fn timeout_with_nothing_reported_is_an_error() {
        let orchestrator = MockOrchestrator::new(
            Some(MockProvider::ok(answer_payload()).delayed(Duration::from_secs(10))),
            None,
            search_config(),
        );
        let options = SearchOptions {
            timeout: Some(Duration::from_millis(50)),
            allow_partial: Some(true),
        };

        let err = orchestrator.execute_parallel_search("q", &options).await.unwrap_err();
        assert!(matches!(err, SearchError::Timeout { .. }));
    }

    #[tokio::test]
    async fn batch_concurrency_stays_within_chunk_size() {
        let provider = MockProvider::ok(pages_payload()).delayed(Duration::from_millis(20));
        let orchestrator = MockOrchestrator::new(None, Some(provider), search_config());
        let queries: Vec<String> = (0..7).map(|i| format!("query {i}")).collect();
        let options = BatchOptions {
            chunk_size: Some(2),
            delay: Some(Duration::ZERO),
            search: SearchOptions::default(),
        };

        let batch = orchestrator.execute_batch_search(&queries, &options).await;

        assert_eq!(batch.total, 7);
        assert_eq!(batch.successful.len(), 7);
        assert!(batch.failed.is_empty());
        let provider = orchestrator.firecrawl.as_ref().unwrap();
        assert_eq!(provider.calls(), 7);
        assert!(provider.peak() <= 2, "peak concurrency {}", provider.peak());
    }

    #[tokio::test]
    async fn batch_records_failed_queries() {
        let orchestrator = MockOrchestrator::new(
            Some(MockProvider::failing("rate limited")),
            None,
            search_config(),
        );
        let queries = vec!["inflation".to_string(), " ".to_string()];

        let batch = orchestrator.execute_batch_search(&queries, &BatchOptions::default()).await;

        assert!(batch.successful.is_empty());
        assert_eq!(batch.failed.len(), 2);
        assert!(batch.failed[0].search_id.is_some());
        assert!(batch.failed[0].error.contains("rate limited"));
        assert!(batch.failed[1].search_id.is_none());
        assert_eq!(batch.failed[1].error, "search query is empty");
    }

    #[tokio::test]
    async fn cancel_wins_over_later_completion() {
        let orchestrator = MockOrchestrator::new(
            Some(MockProvider::ok(answer_payload()).delayed(Duration::from_millis(200))),
            None,
            search_config(),
        );

        let options = SearchOptions::default();
        let search = orchestrator.execute_parallel_search("q", &options);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let active = orchestrator.active_searches();
            orchestrator.cancel_search(&active[0].id)
        };
        let (result, cancelled) = tokio::join!(search, cancel);

        assert!(cancelled);
        let result = result.unwrap();
        assert_eq!(result.status, SearchStatus::Cancelled);
        assert!(result.sources.is_empty());
        assert!(!orchestrator.cancel_search("unknown-id"));
    }

    #[tokio::test]
    async fn cancelled_search_reports_cancelled_at_timeout() {
        let orchestrator = MockOrchestrator::new(
            Some(MockProvider::ok(answer_payload()).delayed(Duration::from_secs(5))),
            None,
            search_config(),
        );
        let options = SearchOptions {
            timeout: Some(Duration::from_millis(150)),
            allow_partial: Some(false),
        };

        let search = orchestrator.execute_parallel_search("q", &options);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            let active = orchestrator.active_searches();
            orchestrator.cancel_search(&active[0].id)
        };
        let (result, cancelled) = tokio::join!(search, cancel);

        assert!(cancelled);
        let result = result.unwrap();
        assert_eq!(result.status, SearchStatus::Cancelled);
        assert_eq!(orchestrator.active_searches()[0].status, SearchStatus::Cancelled);
    }

    #[test]
    fn single_outcome_wraps_into_batch_shape() {
        let started = Utc::now();
        let batch = BatchResult::single("q", Err(SearchError::NoProvidersEnabled), started);

        assert_eq!(batch.total, 1);
        assert!(batch.successful.is_empty());
        assert_eq!(batch.failed[0].error, "no search providers are enabled");
        assert!(batch.failed[0].search_id.is_none());
    }

    #[test]
    fn enabled_providers_follow_construction() {
        let orchestrator =
            MockOrchestrator::new(None, Some(MockProvider::ok(pages_payload())), search_config());
        assert_eq!(orchestrator.enabled_providers(), vec![ProviderKind::Firecrawl]);
    }
}
