use std::collections::HashSet;

use super::record::{NormalizedRecord, first_chars};

const SIMILARITY_THRESHOLD: f64 = 0.8;
const CONTENT_PREFIX_CHARS: usize = 100;

/// Lowercased, punctuation-stripped, whitespace-tokenized word set.
fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Intersection over union. Two empty sets score 0.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

// Generated titles are shared by every record from the same query, so only
// supplied titles are compared.
fn is_duplicate(a: &NormalizedRecord, b: &NormalizedRecord) -> bool {
    let titles_match = !a.synthesized_title
        && !b.synthesized_title
        && jaccard(&word_set(&a.title), &word_set(&b.title)) > SIMILARITY_THRESHOLD;
    titles_match || {
        let a_prefix = word_set(&first_chars(&a.content, CONTENT_PREFIX_CHARS));
        let b_prefix = word_set(&first_chars(&b.content, CONTENT_PREFIX_CHARS));
        jaccard(&a_prefix, &b_prefix) > SIMILARITY_THRESHOLD
    }
}

/// Pairwise near-duplicate removal. Of two duplicates the one with higher
/// relevance stays; on a tie the earlier one does. Returns the kept records
/// and the number removed.
///
/// `kept` never holds two duplicates of each other: an incoming record is
/// checked against every kept record it resembles, not just the first.
pub(crate) fn deduplicate(records: Vec<NormalizedRecord>) -> (Vec<NormalizedRecord>, usize) {
    let total = records.len();
    let mut kept: Vec<NormalizedRecord> = Vec::with_capacity(total);

    for record in records {
        // Position of the first record this one displaced.
        let mut slot: Option<usize> = None;
        let survives = loop {
            match kept.iter().position(|existing| is_duplicate(existing, &record)) {
                Some(index) if record.relevance > kept[index].relevance => {
                    kept.remove(index);
                    slot = Some(slot.map_or(index, |s| s.min(index)));
                }
                Some(_) => break false,
                None => break true,
            }
        };
        if survives {
            match slot {
                Some(index) => kept.insert(index, record),
                None => kept.push(record),
            }
        }
    }

    let removed = total - kept.len();
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Confidence, ProviderKind};
    use crate::results::categorize::Category;
    use chrono::Utc;

    fn record(id: &str, source: ProviderKind, title: &str, content: &str, relevance: u8) -> NormalizedRecord {
        NormalizedRecord {
            id: id.into(),
            query: "q".into(),
            search_id: "s".into(),
            source,
            url: None,
            title: title.into(),
            content: content.into(),
            summary: String::new(),
            relevance,
            confidence: Confidence::Medium,
            quality_score: 0,
            category: Category::GeneralFinancial,
            tags: vec![],
            timestamp: Utc::now(),
            synthesized_title: false,
            rich_source: false,
        }
    }

    fn ids(records: &[NormalizedRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn jaccard_of_empty_sets_is_zero() {
        assert_eq!(jaccard(&word_set(""), &word_set("  ...  ")), 0.0);
    }

    #[test]
    fn word_set_ignores_case_and_punctuation() {
        let set = word_set("Fed, rates: HOLD!");
        assert_eq!(set.len(), 3);
        assert!(set.contains("fed"));
        assert!(set.contains("hold"));
    }

    #[test]
    fn cross_provider_duplicate_collapses() {
        let content = "The Federal Reserve held its benchmark rate steady at 5.25 to 5.50 percent.";
        let records = vec![
            record("a", ProviderKind::Perplexity, "Fed holds rates steady", content, 85),
            record("b", ProviderKind::Firecrawl, "Fed Holds Rates Steady!", content, 90),
        ];

        let (kept, removed) = deduplicate(records);
        assert_eq!(removed, 1);
        assert_eq!(ids(&kept), vec!["b"]);
    }

    #[test]
    fn keeps_existing_record_on_relevance_tie() {
        let records = vec![
            record("first", ProviderKind::Firecrawl, "Same title here", "alpha", 70),
            record("second", ProviderKind::Firecrawl, "Same title here", "beta", 70),
        ];

        let (kept, _) = deduplicate(records);
        assert_eq!(ids(&kept), vec!["first"]);
    }

    #[test]
    fn distinct_records_survive() {
        let records = vec![
            record("a", ProviderKind::Firecrawl, "CPI rises", "Consumer prices rose in May", 80),
            record("b", ProviderKind::Firecrawl, "Jobs report", "Payrolls beat expectations", 80),
        ];

        let (kept, removed) = deduplicate(records);
        assert_eq!(removed, 0);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn synthesized_titles_are_not_compared() {
        let mut a = record("a", ProviderKind::Firecrawl, "Page from example.com", "one thing", 80);
        let mut b = record("b", ProviderKind::Firecrawl, "Page from example.com", "another topic", 80);
        a.synthesized_title = true;
        b.synthesized_title = true;

        let (kept, _) = deduplicate(vec![a, b]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn deduplication_is_idempotent() {
        let records = vec![
            record("a", ProviderKind::Perplexity, "Fed holds rates", "rates unchanged this month", 85),
            record("b", ProviderKind::Firecrawl, "Fed holds rates", "different body text", 95),
            record("c", ProviderKind::Firecrawl, "Inflation cools", "cpi fell to 3 percent", 70),
            record("d", ProviderKind::Firecrawl, "Other", "cpi fell to 3 percent", 60),
        ];

        let (once, _) = deduplicate(records);
        let (twice, removed) = deduplicate(once.clone());
        assert_eq!(removed, 0);
        assert_eq!(ids(&once), ids(&twice));
        assert_eq!(ids(&once), vec!["b", "c"]);
    }

    #[test]
    fn winner_is_checked_against_every_kept_record() {
        // "b" duplicates "a" by title and "c" by content, and outranks both.
        let records = vec![
            record("a", ProviderKind::Firecrawl, "fed holds rates", "alpha beta gamma", 60),
            record("c", ProviderKind::Firecrawl, "jobs report", "cpi fell three percent", 70),
            record("b", ProviderKind::Perplexity, "fed holds rates", "cpi fell three percent", 90),
        ];

        let (once, removed) = deduplicate(records);
        assert_eq!(ids(&once), vec!["b"]);
        assert_eq!(removed, 2);

        let (twice, removed_again) = deduplicate(once.clone());
        assert_eq!(removed_again, 0);
        assert_eq!(ids(&twice), ids(&once));
    }

    #[test]
    fn displacing_record_takes_the_earliest_slot() {
        let records = vec![
            record("a", ProviderKind::Firecrawl, "cpi rises", "consumer prices rose in may", 50),
            record("x", ProviderKind::Firecrawl, "jobs report", "payrolls beat expectations", 80),
            record("b", ProviderKind::Firecrawl, "cpi rises", "another take on prices", 75),
        ];

        let (kept, removed) = deduplicate(records);
        assert_eq!(removed, 1);
        assert_eq!(ids(&kept), vec!["b", "x"]);
    }
}
