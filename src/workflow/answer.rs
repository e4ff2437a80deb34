use serde::Serialize;

use super::planning::{ResearchPlan, summarize_plan};
use crate::markdown::{escape_link_text, single_line};
use crate::provider::ProviderKind;
use crate::results::{NormalizedRecord, ProcessedResults};
use crate::search::BatchResult;
use crate::search::operation::{Evidence, SearchEntry};

/// Evidence items handed to the answering model.
pub const MAX_EVIDENCE: usize = 10;
const SNIPPET_CHARS: usize = 400;

/// What the search stage produced, ranked when processing succeeded.
#[derive(Debug)]
pub enum ResearchEvidence {
    Ranked(ProcessedResults),
    Unranked(Vec<SearchEntry>),
}

impl ResearchEvidence {
    /// Raw entries in provider order, for when ranking is off or failed.
    pub fn unranked(batch: &BatchResult) -> Self {
        Self::Unranked(
            batch
                .successful
                .iter()
                .flat_map(|r| r.all_results.iter().cloned())
                .collect(),
        )
    }

    pub fn count(&self) -> usize {
        match self {
            Self::Ranked(processed) => processed.items.len(),
            Self::Unranked(entries) => entries.len(),
        }
    }

    pub fn top(&self, limit: usize) -> Vec<EvidenceItem> {
        match self {
            Self::Ranked(processed) => processed.items.iter().take(limit).map(EvidenceItem::from_record).collect(),
            Self::Unranked(entries) => entries.iter().take(limit).map(EvidenceItem::from_entry).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceItem {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub source: ProviderKind,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<u8>,
}

impl EvidenceItem {
    fn from_record(record: &NormalizedRecord) -> Self {
        let snippet = if record.summary.is_empty() {
            &record.content
        } else {
            &record.summary
        };
        Self {
            title: record.title.clone(),
            url: record.url.clone(),
            source: record.source,
            snippet: snippet.chars().take(SNIPPET_CHARS).collect(),
            quality_score: Some(record.quality_score),
        }
    }

    fn from_entry(entry: &SearchEntry) -> Self {
        let (title, url, text) = match &entry.evidence {
            Evidence::Answer(answer) => (
                format!("{} answer", entry.provider),
                answer.citations.first().map(|c| c.url.clone()),
                answer.content.as_str(),
            ),
            Evidence::Page(page) => (
                page.title
                    .clone()
                    .or_else(|| page.metadata_title.clone())
                    .unwrap_or_else(|| page.url.clone()),
                Some(page.url.clone()),
                page.description
                    .as_deref()
                    .or(page.markdown.as_deref())
                    .unwrap_or_default(),
            ),
        };
        Self {
            title,
            url,
            source: entry.provider,
            snippet: text.chars().take(SNIPPET_CHARS).collect(),
            quality_score: None,
        }
    }
}

pub(crate) fn answer_prompt(question: &str, plan: &ResearchPlan, evidence: &[EvidenceItem]) -> String {
    let mut prompt = String::from(
        "You are a financial analyst. Answer the user's question using the research below. \
Cite sources inline as Markdown links, state figures with their dates, and say plainly \
when the evidence is thin or conflicting. Do not give personalized investment advice.\n\n",
    );
    prompt.push_str(&format!("Question: {question}\n\n"));
    prompt.push_str(&summarize_plan(plan));
    prompt.push('\n');

    if evidence.is_empty() {
        prompt.push_str(
            "No search results were available. Answer from general knowledge and say that \
current data could not be retrieved.\n",
        );
        return prompt;
    }

    prompt.push_str("### Evidence\n\n");
    for (i, item) in evidence.iter().enumerate() {
        let title = escape_link_text(&single_line(&item.title));
        match &item.url {
            Some(url) => prompt.push_str(&format!("{}. [{title}]({url}) ({})\n", i + 1, item.source)),
            None => prompt.push_str(&format!("{}. {title} ({})\n", i + 1, item.source)),
        }
        if !item.snippet.is_empty() {
            prompt.push_str(&format!("   {}\n", single_line(&item.snippet)));
        }
    }
    prompt
}
