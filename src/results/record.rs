use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use super::categorize::Category;
use crate::firecrawl::types::ScrapedPage;
use crate::perplexity::types::SearchAnswer;
use crate::provider::{Confidence, ProviderKind};
use crate::search::CombinedResult;
use crate::search::operation::{Evidence, SearchEntry};

const SUMMARY_CHARS: usize = 200;

/// One evidence item after normalization, the unit that is deduplicated,
/// scored and ranked.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRecord {
    pub id: String,
    pub query: String,
    pub search_id: String,
    pub source: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub title: String,
    pub content: String,
    pub summary: String,
    pub relevance: u8,
    pub confidence: Confidence,
    pub quality_score: u8,
    pub category: Category,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Title was generated rather than supplied by the provider.
    #[serde(skip)]
    pub synthesized_title: bool,
    /// Backed by citations or full page content.
    #[serde(skip)]
    pub rich_source: bool,
}

/// A provider entry tagged with the query and search that produced it.
pub(crate) struct RawRecord<'a> {
    pub query: &'a str,
    pub search_id: &'a str,
    pub entry: &'a SearchEntry,
}

pub(crate) fn extract(results: &[CombinedResult]) -> Vec<RawRecord<'_>> {
    results
        .iter()
        .flat_map(|result| {
            result.all_results.iter().map(|entry| RawRecord {
                query: &result.query,
                search_id: &result.search_id,
                entry,
            })
        })
        .collect()
}

pub(crate) fn normalize(raw: &RawRecord<'_>, index: usize) -> NormalizedRecord {
    let mut record = match &raw.entry.evidence {
        Evidence::Answer(answer) => normalize_answer(raw, answer),
        Evidence::Page(page) => normalize_page(raw, page),
    };
    record.id = format!("{}-{index}", raw.search_id);
    record
}

fn normalize_answer(raw: &RawRecord<'_>, answer: &SearchAnswer) -> NormalizedRecord {
    let relevance = match answer.confidence {
        Confidence::High => 85,
        Confidence::Medium => 65,
        _ => 45,
    };
    NormalizedRecord {
        title: format!("{} answer: {}", raw.entry.provider, raw.query),
        url: answer.citations.first().map(|c| c.url.clone()),
        content: answer.content.clone(),
        summary: first_chars(&answer.content, SUMMARY_CHARS),
        relevance,
        confidence: answer.confidence,
        synthesized_title: true,
        rich_source: !answer.citations.is_empty(),
        ..base(raw)
    }
}

fn normalize_page(raw: &RawRecord<'_>, page: &ScrapedPage) -> NormalizedRecord {
    let supplied_title = page.title.clone().or_else(|| page.metadata_title.clone());
    let synthesized_title = supplied_title.is_none();
    let title = supplied_title.unwrap_or_else(|| default_page_title(&page.url));
    let content = page
        .markdown
        .clone()
        .or_else(|| page.description.clone())
        .unwrap_or_default();
    let summary = page
        .description
        .clone()
        .unwrap_or_else(|| first_chars(&content, SUMMARY_CHARS));
    let confidence = match page.relevance {
        80.. => Confidence::High,
        60..=79 => Confidence::Medium,
        _ => Confidence::Low,
    };

    NormalizedRecord {
        url: Some(page.url.clone()),
        title,
        content,
        summary,
        relevance: page.relevance.min(100),
        confidence,
        synthesized_title,
        rich_source: page.markdown.is_some(),
        ..base(raw)
    }
}

fn base(raw: &RawRecord<'_>) -> NormalizedRecord {
    NormalizedRecord {
        id: String::new(),
        query: raw.query.to_string(),
        search_id: raw.search_id.to_string(),
        source: raw.entry.provider,
        url: None,
        title: String::new(),
        content: String::new(),
        summary: String::new(),
        relevance: 0,
        confidence: Confidence::Low,
        quality_score: 0,
        category: Category::GeneralFinancial,
        tags: Vec::new(),
        timestamp: raw.entry.timestamp,
        synthesized_title: false,
        rich_source: false,
    }
}

fn default_page_title(url: &str) -> String {
    match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string)) {
        Some(host) => format!("Page from {}", host.trim_start_matches("www.")),
        None => "Untitled page".to_string(),
    }
}

pub(crate) fn first_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}
