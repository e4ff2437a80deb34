use tracing::warn;

use super::types::GenerateContentResponse;

/// Concatenates the text parts of the first candidate. `None` when the model
/// returned nothing usable (safety block, empty candidate list).
pub fn extract_text(response: &GenerateContentResponse) -> Option<String> {
    let candidate = response.candidates.as_ref().and_then(|c| c.first());

    let text = candidate
        .and_then(|c| c.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .map(|part| part.text.as_str())
                .collect::<String>()
        })
        .filter(|text| !text.trim().is_empty());

    if text.is_none() {
        let reason = candidate
            .and_then(|c| c.finish_reason.as_deref())
            .unwrap_or("none");
        warn!(finish_reason = reason, "Gemini returned empty answer");
    }

    text
}
