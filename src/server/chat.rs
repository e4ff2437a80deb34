use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use super::AppState;
use super::errors::{ApiError, bad_request};
use super::params::ChatParams;
use crate::provider::ProviderKind;
use crate::workflow::{WorkflowOutcome, WorkflowStatus};

/// Sent when answer generation fails; the request still succeeds.
pub(super) const FALLBACK_ANSWER: &str = "I'm sorry, I couldn't put together an answer to that \
question right now. The research services may be busy or unavailable; please try again in a \
moment.";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChatResponse {
    id: String,
    original_question: String,
    answer: String,
    search_results_used: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    workflow: Option<WorkflowOutcome>,
    timestamp: DateTime<Utc>,
    status: WorkflowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub(super) async fn handle_chat(
    State(state): State<Arc<AppState>>,
    params: Result<Json<ChatParams>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(params) = params?;
    let question = params.message.trim();
    if question.is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let workflow = state.workflow()?;
    let id = Uuid::new_v4().to_string();
    info!(chat_id = %id, question, "chat request");

    let response = match workflow.run(question).await {
        Ok(mut outcome) => ChatResponse {
            id,
            original_question: question.to_string(),
            answer: std::mem::take(&mut outcome.answer),
            search_results_used: outcome.evidence.len(),
            status: outcome.status,
            workflow: Some(outcome),
            timestamp: Utc::now(),
            error: None,
        },
        Err(e) => {
            warn!(chat_id = %id, error = %e, "chat fell back to apology");
            ChatResponse {
                id,
                original_question: question.to_string(),
                answer: FALLBACK_ANSWER.to_string(),
                search_results_used: 0,
                workflow: None,
                timestamp: Utc::now(),
                status: WorkflowStatus::Fallback,
                error: Some(e.to_string()),
            }
        }
    };
    Ok(Json(response))
}

pub(super) async fn handle_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    let active = state
        .search
        .active_searches()
        .iter()
        .filter(|s| !s.status.is_terminal())
        .count();
    let providers = state.search.enabled_providers();

    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "features": {
            "chat": state.workflow.is_some(),
            "streaming": state.workflow.is_some(),
            "perplexity": providers.contains(&ProviderKind::Perplexity),
            "firecrawl": providers.contains(&ProviderKind::Firecrawl),
            "resultProcessing": config.processing.enabled,
        },
        "config": {
            "planningModel": config.gemini.planning_model,
            "answerModel": config.gemini.answer_model,
            "perplexityModel": config.perplexity.model,
            "firecrawlLimit": config.firecrawl.limit,
            "searchTimeoutMs": millis(config.search.timeout),
            "allowPartial": config.search.allow_partial,
            "batchSize": config.search.batch_size,
            "maxSubQuestions": config.workflow.max_sub_questions,
            "maxConcurrentSearches": config.workflow.max_concurrent_searches,
            "streamChunkSize": config.stream.chunk_size,
            "streamChunkDelayMs": millis(config.stream.chunk_delay),
        },
        "activeSearches": active,
        "timestamp": Utc::now(),
    }))
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
