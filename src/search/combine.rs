use chrono::{DateTime, Utc};
use serde::Serialize;

use super::operation::{SearchEntry, SearchOperation, SearchStatus};
use crate::provider::{Confidence, ProviderKind};

const HIGH_CONFIDENCE_SCORE: f64 = 90.0;
const DEFAULT_ENTRY_SCORE: f64 = 50.0;

/// Flat view over one finished operation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedResult {
    pub search_id: String,
    pub query: String,
    pub status: SearchStatus,
    pub sources: Vec<ProviderKind>,
    pub all_results: Vec<SearchEntry>,
    pub combined_confidence: u8,
    pub errors: Vec<ProviderFailure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderFailure {
    pub provider: ProviderKind,
    pub message: String,
}

impl CombinedResult {
    /// `"perplexity: boom; firecrawl: timeout"`, or `None` when nothing failed.
    pub fn failure_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|f| format!("{}: {}", f.provider, f.message))
            .collect();
        Some(parts.join("; "))
    }
}

pub fn combine_search_results(op: &SearchOperation) -> CombinedResult {
    let mut sources = Vec::new();
    let mut all_results = Vec::new();
    let mut errors = Vec::new();

    for kind in [ProviderKind::Perplexity, ProviderKind::Firecrawl] {
        let slot = op.slot(kind);
        if let Some(result) = &slot.result {
            sources.push(kind);
            all_results.extend(result.entries());
        }
        if let Some(message) = &slot.error {
            errors.push(ProviderFailure {
                provider: kind,
                message: message.clone(),
            });
        }
    }

    CombinedResult {
        search_id: op.id.clone(),
        query: op.query.clone(),
        status: op.status,
        sources,
        combined_confidence: combined_confidence(&all_results),
        all_results,
        errors,
        started_at: op.started_at,
        completed_at: op.ended_at,
        duration_ms: op.elapsed_ms(Utc::now()),
    }
}

fn entry_score(entry: &SearchEntry) -> f64 {
    if entry.confidence() == Some(Confidence::High) {
        return HIGH_CONFIDENCE_SCORE;
    }
    entry
        .relevance()
        .map_or(DEFAULT_ENTRY_SCORE, f64::from)
}

fn combined_confidence(entries: &[SearchEntry]) -> u8 {
    if entries.is_empty() {
        return 0;
    }
    let total: f64 = entries.iter().map(entry_score).sum();
    (total / entries.len() as f64).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firecrawl::types::ScrapedPage;
    use crate::perplexity::types::{Citation, SearchAnswer};
    use crate::provider::ProviderPayload;
    use crate::search::operation::ProviderResult;

    fn answer(confidence: Confidence) -> ProviderPayload {
        ProviderPayload::Answer(SearchAnswer {
            id: "pplx-1".into(),
            content: "The Fed held the target range at 5.25-5.50%.".into(),
            citations: vec![Citation {
                url: "https://federalreserve.gov".into(),
                title: None,
            }],
            confidence,
        })
    }

    fn page(url: &str, relevance: u8) -> ScrapedPage {
        ScrapedPage {
            url: url.into(),
            title: Some("Rates".into()),
            metadata_title: None,
            description: None,
            markdown: None,
            relevance,
        }
    }

    fn operation(query: &str) -> SearchOperation {
        let mut op = SearchOperation::new("search-1".into(), query, Utc::now());
        op.transition(SearchStatus::InProgress, Utc::now());
        op
    }

    #[test]
    fn federal_reserve_scenario() {
        let mut op = operation("Federal Reserve interest rate");
        op.record(
            ProviderKind::Perplexity,
            Ok(ProviderResult::new(
                ProviderKind::Perplexity,
                answer(Confidence::High),
            )),
        );
        op.record(
            ProviderKind::Firecrawl,
            Ok(ProviderResult::new(
                ProviderKind::Firecrawl,
                ProviderPayload::Pages(vec![page("https://a.com", 95), page("https://b.com", 80)]),
            )),
        );
        op.transition(SearchStatus::Completed, Utc::now());

        let combined = combine_search_results(&op);
        assert_eq!(combined.sources.len(), 2);
        assert_eq!(combined.all_results.len(), 3);
        assert_eq!(combined.combined_confidence, 88);
        assert!(combined.failure_summary().is_none());
    }

    #[test]
    fn sources_exclude_failed_providers() {
        let mut op = operation("q");
        op.record(
            ProviderKind::Perplexity,
            Ok(ProviderResult::new(
                ProviderKind::Perplexity,
                answer(Confidence::Medium),
            )),
        );
        op.record(ProviderKind::Firecrawl, Err("quota exhausted".into()));

        let combined = combine_search_results(&op);
        assert_eq!(combined.sources, vec![ProviderKind::Perplexity]);
        assert_eq!(combined.combined_confidence, 50);
        assert_eq!(
            combined.failure_summary().as_deref(),
            Some("firecrawl: quota exhausted")
        );
    }

    #[test]
    fn no_entries_means_zero_confidence() {
        let mut op = operation("q");
        op.record(
            ProviderKind::Firecrawl,
            Ok(ProviderResult::new(
                ProviderKind::Firecrawl,
                ProviderPayload::Pages(vec![]),
            )),
        );

        let combined = combine_search_results(&op);
        assert_eq!(combined.sources, vec![ProviderKind::Firecrawl]);
        assert!(combined.all_results.is_empty());
        assert_eq!(combined.combined_confidence, 0);
    }

    #[test]
    fn serializes_camel_case_with_flat_entries() {
        let mut op = operation("q");
        op.record(
            ProviderKind::Firecrawl,
            Ok(ProviderResult::new(
                ProviderKind::Firecrawl,
                ProviderPayload::Pages(vec![page("https://a.com", 95)]),
            )),
        );

        let json = serde_json::to_value(combine_search_results(&op)).unwrap();
        assert_eq!(json["searchId"], "search-1");
        assert_eq!(json["combinedConfidence"], 95);
        assert_eq!(json["allResults"][0]["provider"], "firecrawl");
        assert_eq!(json["allResults"][0]["kind"], "page");
        assert_eq!(json["allResults"][0]["evidence"]["url"], "https://a.com");
    }
}
