use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    /// The user's question. Missing and blank are both rejected.
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Single query; returns one combined result.
    pub query: Option<String>,
    /// Several queries; returns a batch result.
    #[serde(default)]
    pub queries: Vec<String>,
    /// Overrides the configured search timeout.
    pub timeout_ms: Option<u64>,
    /// Overrides the configured partial-result fallback.
    pub allow_partial: Option<bool>,
    /// Overrides the configured batch window size.
    pub chunk_size: Option<usize>,
}
