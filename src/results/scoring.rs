use chrono::{DateTime, TimeDelta, Utc};

use super::record::NormalizedRecord;
use crate::provider::Confidence;

const RELEVANCE_WEIGHT: f64 = 0.4;
const CONFIDENCE_WEIGHT: f64 = 0.3;
const FRESHNESS_WEIGHT: f64 = 0.2;
const COMPLETENESS_WEIGHT: f64 = 0.1;

fn confidence_tier(confidence: Confidence) -> f64 {
    match confidence {
        Confidence::High => 100.0,
        Confidence::Medium => 75.0,
        Confidence::Low => 50.0,
        Confidence::Failed => 0.0,
    }
}

/// Future timestamps count as fresh.
fn freshness(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = now - timestamp;
    if age < TimeDelta::hours(1) {
        100.0
    } else if age < TimeDelta::hours(24) {
        90.0
    } else if age < TimeDelta::weeks(1) {
        70.0
    } else {
        50.0
    }
}

fn completeness(record: &NormalizedRecord) -> f64 {
    let checks = [
        !record.synthesized_title,
        record.content.chars().count() > 50,
        record.url.is_some(),
        record.summary.chars().count() > 20,
        record.rich_source,
    ];
    let passed = checks.iter().filter(|&&ok| ok).count();
    passed as f64 / checks.len() as f64 * 100.0
}

/// Weighted blend of relevance, confidence, freshness and completeness,
/// always within 0..=100.
pub fn quality_score(record: &NormalizedRecord, now: DateTime<Utc>) -> u8 {
    let score = f64::from(record.relevance.min(100)) * RELEVANCE_WEIGHT
        + confidence_tier(record.confidence) * CONFIDENCE_WEIGHT
        + freshness(record.timestamp, now) * FRESHNESS_WEIGHT
        + completeness(record) * COMPLETENESS_WEIGHT;
    score.round().clamp(0.0, 100.0) as u8
}
