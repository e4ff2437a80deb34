use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::firecrawl::types::ScrapedPage;
use crate::perplexity::types::SearchAnswer;
use crate::provider::{Confidence, ProviderKind, ProviderPayload};

/// `pending → in_progress → {completed | partial_success | failed | timeout | cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Pending,
    InProgress,
    Completed,
    PartialSuccess,
    Failed,
    Timeout,
    Cancelled,
}

impl SearchStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SearchStatus::Pending | SearchStatus::InProgress)
    }

    /// Statuses whose results are usable downstream.
    pub fn is_success(self) -> bool {
        matches!(self, SearchStatus::Completed | SearchStatus::PartialSuccess)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SearchStatus::Pending => "pending",
            SearchStatus::InProgress => "in_progress",
            SearchStatus::Completed => "completed",
            SearchStatus::PartialSuccess => "partial_success",
            SearchStatus::Failed => "failed",
            SearchStatus::Timeout => "timeout",
            SearchStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
    pub provider: ProviderKind,
    pub provider_id: String,
    pub payload: ProviderPayload,
    pub timestamp: DateTime<Utc>,
}

impl ProviderResult {
    pub fn new(provider: ProviderKind, payload: ProviderPayload) -> Self {
        let provider_id = match &payload {
            ProviderPayload::Answer(answer) if !answer.id.is_empty() => answer.id.clone(),
            _ => format!("{provider}-{}", Uuid::new_v4()),
        };
        Self {
            provider,
            provider_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// One entry per free-text answer, one per page.
    pub fn entries(&self) -> Vec<SearchEntry> {
        let entry = |evidence| SearchEntry {
            provider: self.provider,
            provider_id: self.provider_id.clone(),
            timestamp: self.timestamp,
            evidence,
        };
        match &self.payload {
            ProviderPayload::Answer(answer) => vec![entry(Evidence::Answer(answer.clone()))],
            ProviderPayload::Pages(pages) => pages
                .iter()
                .map(|page| entry(Evidence::Page(page.clone())))
                .collect(),
        }
    }
}

/// One result/error slot per provider. A provider writes only its own slot.
#[derive(Debug, Clone, Default)]
pub struct ProviderSlot {
    pub result: Option<ProviderResult>,
    pub error: Option<String>,
}

impl ProviderSlot {
    fn reported(&self) -> bool {
        self.result.is_some() || self.error.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct SearchOperation {
    pub id: String,
    pub query: String,
    pub status: SearchStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub perplexity: ProviderSlot,
    pub firecrawl: ProviderSlot,
}

impl SearchOperation {
    pub fn new(id: String, query: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            query: query.to_string(),
            status: SearchStatus::Pending,
            started_at: now,
            ended_at: None,
            perplexity: ProviderSlot::default(),
            firecrawl: ProviderSlot::default(),
        }
    }

    pub fn slot(&self, provider: ProviderKind) -> &ProviderSlot {
        match provider {
            ProviderKind::Perplexity => &self.perplexity,
            ProviderKind::Firecrawl => &self.firecrawl,
        }
    }

    fn slot_mut(&mut self, provider: ProviderKind) -> &mut ProviderSlot {
        match provider {
            ProviderKind::Perplexity => &mut self.perplexity,
            ProviderKind::Firecrawl => &mut self.firecrawl,
        }
    }

    /// Writes a provider outcome. Ignored once the operation is terminal.
    pub fn record(&mut self, provider: ProviderKind, outcome: Result<ProviderResult, String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let slot = self.slot_mut(provider);
        match outcome {
            Ok(result) => slot.result = Some(result),
            Err(message) => slot.error = Some(message),
        }
        true
    }

    /// Moves to `next` unless already terminal. Terminal moves stamp `ended_at`.
    pub fn transition(&mut self, next: SearchStatus, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        true
    }

    pub fn has_result(&self) -> bool {
        self.perplexity.result.is_some() || self.firecrawl.result.is_some()
    }

    pub fn reported_providers(&self) -> Vec<ProviderKind> {
        [ProviderKind::Perplexity, ProviderKind::Firecrawl]
            .into_iter()
            .filter(|p| self.slot(*p).reported())
            .collect()
    }

    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (self.ended_at.unwrap_or(now) - self.started_at).num_milliseconds()
    }
}

/// Flat, provider-tagged piece of evidence inside a combined result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEntry {
    pub provider: ProviderKind,
    pub provider_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub evidence: Evidence,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "evidence", rename_all = "snake_case")]
pub enum Evidence {
    Answer(SearchAnswer),
    Page(ScrapedPage),
}

impl SearchEntry {
    pub fn confidence(&self) -> Option<Confidence> {
        match &self.evidence {
            Evidence::Answer(answer) => Some(answer.confidence),
            Evidence::Page(_) => None,
        }
    }

    pub fn relevance(&self) -> Option<u8> {
        match &self.evidence {
            Evidence::Answer(_) => None,
            Evidence::Page(page) => Some(page.relevance),
        }
    }
}
