use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub limit: u32,
    pub scrape_options: ScrapeOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeOptions {
    pub formats: Vec<&'static str>,
    pub only_main_content: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Vec<Document>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Document {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub markdown: Option<String>,
    pub metadata: Option<DocumentMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "sourceURL")]
    pub source_url: Option<String>,
}

/// One search hit with its scraped markdown. `relevance` (0-100) reflects
/// the provider's rank order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapedPage {
    pub url: String,
    pub title: Option<String>,
    pub metadata_title: Option<String>,
    pub description: Option<String>,
    pub markdown: Option<String>,
    pub relevance: u8,
}
