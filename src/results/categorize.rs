use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Utc};
use regex::Regex;
use serde::Serialize;
use url::Url;

use super::record::NormalizedRecord;

const MAX_TAGS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    InterestRates,
    Inflation,
    StockMarket,
    EconomicIndicators,
    Employment,
    Currency,
    GeneralFinancial,
}

// Checked in order; the first match wins.
const CATEGORY_PATTERNS: &[(Category, &str)] = &[
    (
        Category::InterestRates,
        r"\b(interest rates?|fed funds|federal funds|rate (hike|cut)s?|basis points?|fomc|monetary policy|yield curve)\b",
    ),
    (
        Category::Inflation,
        r"\b(inflation|cpi|consumer prices?|pce|deflation|price index)\b",
    ),
    (
        Category::StockMarket,
        r"\b(stocks?|stock market|s&p 500|nasdaq|dow jones|equit(y|ies)|shares|earnings|ipo)\b",
    ),
    (
        Category::EconomicIndicators,
        r"\b(gdp|gross domestic product|recession|economic growth|pmi|retail sales|industrial production)\b",
    ),
    (
        Category::Employment,
        r"\b(unemployment|jobs report|payrolls?|jobless|labor market|employment)\b",
    ),
    (
        Category::Currency,
        r"\b(currenc(y|ies)|exchange rates?|forex|dollar index|usd|eur|yen|bitcoin)\b",
    ),
];

static CATEGORY_MATCHERS: LazyLock<Vec<(Category, Regex)>> = LazyLock::new(|| {
    CATEGORY_PATTERNS
        .iter()
        .filter_map(|(category, pattern)| Regex::new(pattern).ok().map(|re| (*category, re)))
        .collect()
});

/// Lowercase needle and tag slug.
const ENTITIES: &[(&str, &str)] = &[
    ("federal reserve", "federal_reserve"),
    ("european central bank", "ecb"),
    ("bank of england", "bank_of_england"),
    ("bank of japan", "bank_of_japan"),
    ("treasury", "treasury"),
    ("imf", "imf"),
    ("world bank", "world_bank"),
    ("s&p 500", "sp500"),
    ("nasdaq", "nasdaq"),
    ("dow jones", "dow_jones"),
];

pub fn categorize(title: &str, content: &str) -> Category {
    let text = format!("{title} {content}").to_lowercase();
    CATEGORY_MATCHERS
        .iter()
        .find(|(_, re)| re.is_match(&text))
        .map_or(Category::GeneralFinancial, |(category, _)| *category)
}

/// `source:`, `domain:`, `entity:` and `year:` tags in first-found order,
/// unique and capped.
pub fn tags(record: &NormalizedRecord, now: DateTime<Utc>) -> Vec<String> {
    let text = format!("{} {}", record.title, record.content).to_lowercase();
    let mut tags = vec![format!("source:{}", record.source)];

    if let Some(host) = record
        .url
        .as_deref()
        .and_then(|u| Url::parse(u).ok())
        .and_then(|u| u.host_str().map(str::to_string))
    {
        tags.push(format!("domain:{}", host.trim_start_matches("www.")));
    }

    tags.extend(
        ENTITIES
            .iter()
            .filter(|(needle, _)| text.contains(needle))
            .map(|(_, slug)| format!("entity:{slug}")),
    );

    let year = now.year().to_string();
    if text.contains(&year) {
        tags.push(format!("year:{year}"));
    }

    let mut unique = Vec::with_capacity(tags.len());
    for tag in tags {
        if !unique.contains(&tag) {
            unique.push(tag);
        }
    }
    unique.truncate(MAX_TAGS);
    unique
}
