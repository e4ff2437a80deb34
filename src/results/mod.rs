//! Results processing: turns combined search results into ranked,
//! categorized evidence.
//!
//! Stages run in order: extract, normalize, deduplicate, score, then
//! categorize and tag. Processing is all-or-nothing; a failure yields a
//! zero-result record carrying the error.

mod categorize;
mod dedup;
mod record;
mod scoring;

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ProcessingConfig;
use crate::provider::{Confidence, ProviderKind};
use crate::search::CombinedResult;

pub use categorize::Category;
pub use record::NormalizedRecord;

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("too many records to process: {count} (limit {limit})")]
    TooManyRecords { count: usize, limit: usize },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedResults {
    pub search_metadata: SearchMetadata,
    pub items: Vec<NormalizedRecord>,
    pub by_category: BTreeMap<Category, Vec<NormalizedRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_result: Option<NormalizedRecord>,
    pub high_confidence: Vec<NormalizedRecord>,
    pub average_quality: u8,
    pub metadata: ProcessingMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub queries: Vec<String>,
    pub search_ids: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetadata {
    pub sources_used: Vec<ProviderKind>,
    pub confidence_distribution: ConfidenceDistribution,
    pub raw_count: usize,
    pub duplicates_removed: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ConfidenceDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub failed: usize,
}

impl ConfidenceDistribution {
    fn count(records: &[NormalizedRecord]) -> Self {
        let mut dist = Self::default();
        for record in records {
            match record.confidence {
                Confidence::High => dist.high += 1,
                Confidence::Medium => dist.medium += 1,
                Confidence::Low => dist.low += 1,
                Confidence::Failed => dist.failed += 1,
            }
        }
        dist
    }
}

pub struct ResultsProcessor {
    max_records: usize,
}

impl ResultsProcessor {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            max_records: config.max_records,
        }
    }

    pub fn process(&self, results: &[CombinedResult]) -> ProcessedResults {
        self.process_at(results, Utc::now())
    }

    /// Processing with an explicit clock for freshness and year tags.
    pub fn process_at(&self, results: &[CombinedResult], now: DateTime<Utc>) -> ProcessedResults {
        let search_metadata = SearchMetadata {
            queries: results.iter().map(|r| r.query.clone()).collect(),
            search_ids: results.iter().map(|r| r.search_id.clone()).collect(),
            processed_at: now,
        };

        match self.rank(results, now) {
            Ok((items, metadata)) => {
                info!(
                    raw = metadata.raw_count,
                    kept = items.len(),
                    duplicates = metadata.duplicates_removed,
                    "results processed"
                );
                assemble(search_metadata, items, metadata)
            }
            Err(e) => {
                warn!(error = %e, "results processing failed");
                ProcessedResults {
                    search_metadata,
                    items: Vec::new(),
                    by_category: BTreeMap::new(),
                    top_result: None,
                    high_confidence: Vec::new(),
                    average_quality: 0,
                    metadata: ProcessingMetadata::default(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn rank(
        &self,
        results: &[CombinedResult],
        now: DateTime<Utc>,
    ) -> Result<(Vec<NormalizedRecord>, ProcessingMetadata), ProcessingError> {
        let raw = record::extract(results);
        if raw.len() > self.max_records {
            return Err(ProcessingError::TooManyRecords {
                count: raw.len(),
                limit: self.max_records,
            });
        }
        let raw_count = raw.len();

        let normalized = raw
            .iter()
            .enumerate()
            .map(|(index, r)| record::normalize(r, index))
            .collect();
        let (mut items, duplicates_removed) = dedup::deduplicate(normalized);

        for item in &mut items {
            item.quality_score = scoring::quality_score(item, now);
        }
        items.sort_by(|a, b| b.quality_score.cmp(&a.quality_score));

        for item in &mut items {
            item.category = categorize::categorize(&item.title, &item.content);
            item.tags = categorize::tags(item, now);
        }

        let sources_used: BTreeSet<ProviderKind> = items.iter().map(|r| r.source).collect();
        let metadata = ProcessingMetadata {
            sources_used: sources_used.into_iter().collect(),
            confidence_distribution: ConfidenceDistribution::count(&items),
            raw_count,
            duplicates_removed,
        };
        Ok((items, metadata))
    }
}

fn assemble(
    search_metadata: SearchMetadata,
    items: Vec<NormalizedRecord>,
    metadata: ProcessingMetadata,
) -> ProcessedResults {
    let mut by_category: BTreeMap<Category, Vec<NormalizedRecord>> = BTreeMap::new();
    for item in &items {
        by_category.entry(item.category).or_default().push(item.clone());
    }
    let high_confidence = items
        .iter()
        .filter(|r| r.confidence == Confidence::High)
        .cloned()
        .collect();
    let average_quality = if items.is_empty() {
        0
    } else {
        let total: u32 = items.iter().map(|r| u32::from(r.quality_score)).sum();
        (f64::from(total) / items.len() as f64).round() as u8
    };

    ProcessedResults {
        search_metadata,
        top_result: items.first().cloned(),
        high_confidence,
        average_quality,
        by_category,
        items,
        metadata,
        error: None,
    }
}
