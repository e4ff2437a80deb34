use serde::{Deserialize, Serialize};

use crate::provider::Confidence;

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Plain citation URLs (older response shape).
    #[serde(default)]
    pub citations: Vec<String>,
    /// Titled search results (newer response shape).
    #[serde(default)]
    pub search_results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct SearchResult {
    pub url: Option<String>,
    pub title: Option<String>,
}

/// Search-LLM answer with its supporting sources.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAnswer {
    pub id: String,
    pub content: String,
    pub citations: Vec<Citation>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}
