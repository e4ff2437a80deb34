use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use super::AppState;
use super::chat::FALLBACK_ANSWER;
use super::errors::{ApiError, bad_request};
use super::params::ChatParams;
use crate::config::StreamConfig;
use crate::provider::{LanguageModel, SearchProvider};
use crate::workflow::planning::summarize_plan;
use crate::workflow::{Workflow, WorkflowStatus};

/// One SSE frame before encoding.
#[derive(Debug)]
pub(super) struct ChatEvent {
    pub(super) id: u64,
    pub(super) name: &'static str,
    pub(super) data: Value,
}

impl ChatEvent {
    fn into_sse(self) -> Event {
        Event::default()
            .id(self.id.to_string())
            .event(self.name)
            .data(self.data.to_string())
    }
}

#[derive(Default)]
struct Sequence(u64);

impl Sequence {
    fn event(&mut self, name: &'static str, data: Value) -> ChatEvent {
        self.0 += 1;
        ChatEvent {
            id: self.0,
            name,
            data,
        }
    }
}

pub(super) async fn handle_chat_stream(
    State(state): State<Arc<AppState>>,
    params: Result<Json<ChatParams>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(params) = params?;
    let question = params.message.trim().to_string();
    if question.is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    let workflow = state.workflow()?;
    let events = chat_events(workflow, question, state.config.stream.clone())
        .map(|event| Ok(event.into_sse()));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Runs the workflow lazily as a stream. Dropping the stream (client
/// disconnect) stops the workflow at its next suspension point.
pub(super) fn chat_events<L, P, F>(
    workflow: Arc<Workflow<L, P, F>>,
    question: String,
    config: StreamConfig,
) -> impl Stream<Item = ChatEvent> + Send
where
    L: LanguageModel + Send + Sync + 'static,
    P: SearchProvider + Send + Sync + 'static,
    F: SearchProvider + Send + Sync + 'static,
{
    stream! {
        let mut seq = Sequence::default();
        let message_id = Uuid::new_v4().to_string();
        debug!(message_id = %message_id, "chat stream opened");

        yield seq.event("planning_start", json!({ "question": question }));

        let planned = workflow.plan(&question).await;
        let planning_event = match &planned.error {
            None => seq.event(
                "planning_complete",
                json!({ "plan": planned.plan, "summary": summarize_plan(&planned.plan) }),
            ),
            Some(error) => seq.event(
                "planning_error",
                json!({ "error": error, "fallbackPlan": planned.plan }),
            ),
        };
        yield planning_event;

        yield seq.event("message_start", json!({ "id": message_id }));

        let (answer, end) = match workflow.run_planned(&question, planned).await {
            Ok(mut outcome) => {
                let answer = std::mem::take(&mut outcome.answer);
                let end = json!({
                    "id": message_id,
                    "status": outcome.status,
                    "searchResultsUsed": outcome.evidence.len(),
                    "workflow": outcome,
                });
                (answer, end)
            }
            Err(e) => {
                warn!(message_id = %message_id, error = %e, "chat stream fell back to apology");
                let end = json!({
                    "id": message_id,
                    "status": WorkflowStatus::Fallback,
                    "searchResultsUsed": 0,
                    "error": e.to_string(),
                });
                (FALLBACK_ANSWER.to_string(), end)
            }
        };

        for (i, chunk) in char_chunks(&answer, config.chunk_size).into_iter().enumerate() {
            if i > 0 && !config.chunk_delay.is_zero() {
                tokio::time::sleep(config.chunk_delay).await;
            }
            yield seq.event("message_chunk", json!({ "content": chunk }));
        }

        yield seq.event("message_end", end);
        debug!(message_id = %message_id, "chat stream closed");
    }
}

/// Splits on character boundaries, never inside a multi-byte character.
fn char_chunks(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size.max(1)).map(String::from_iter).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use reqwest::Client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::firecrawl::FirecrawlClient;
    use crate::perplexity::PerplexityClient;
    use crate::server::test_support::{answer_model_config, gemini, spawn, test_config};
    use crate::workflow::tests::{MockModel, PLAN, workflow};

    fn stream_config(chunk_size: usize) -> StreamConfig {
        StreamConfig {
            chunk_size,
            chunk_delay: Duration::ZERO,
        }
    }

    fn names(events: &[ChatEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.name).collect()
    }

    #[test]
    fn chunks_respect_char_boundaries() {
        assert_eq!(char_chunks("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(char_chunks("€€€", 2), vec!["€€", "€"]);
        assert!(char_chunks("", 4).is_empty());
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let wf = Arc::new(workflow(
            MockModel::replying(PLAN),
            MockModel::replying("Rates are steady."),
            true,
        ));

        let events: Vec<ChatEvent> = chat_events(wf, "rates?".into(), stream_config(5))
            .collect()
            .await;

        let names = names(&events);
        assert_eq!(&names[..3], ["planning_start", "planning_complete", "message_start"]);
        assert_eq!(names.last(), Some(&"message_end"));
        let chunks: String = events
            .iter()
            .filter(|e| e.name == "message_chunk")
            .map(|e| e.data["content"].as_str().unwrap())
            .collect();
        assert_eq!(chunks, "Rates are steady.");
        assert_eq!(events.iter().filter(|e| e.name == "message_chunk").count(), 4);

        let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
        assert_eq!(ids, (1..=events.len() as u64).collect::<Vec<_>>());

        let end = &events[events.len() - 1].data;
        assert_eq!(end["status"], "success");
        assert!(end["searchResultsUsed"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn planning_failure_emits_planning_error() {
        let wf = Arc::new(workflow(
            MockModel::failing(500),
            MockModel::replying("ok"),
            true,
        ));

        let events: Vec<ChatEvent> = chat_events(wf, "What is CPI?".into(), stream_config(24))
            .collect()
            .await;

        assert_eq!(events[1].name, "planning_error");
        assert_eq!(events[1].data["fallbackPlan"]["subQuestions"][0], "What is CPI?");
        assert_eq!(events.last().unwrap().data["status"], "fallback");
    }

    #[tokio::test]
    async fn answer_failure_streams_apology() {
        let wf = Arc::new(workflow(MockModel::replying(PLAN), MockModel::failing(503), true));

        let events: Vec<ChatEvent> = chat_events(wf, "rates?".into(), stream_config(1000))
            .collect()
            .await;

        let chunk = events.iter().find(|e| e.name == "message_chunk").unwrap();
        assert_eq!(chunk.data["content"], FALLBACK_ANSWER);
        let end = events.last().unwrap();
        assert_eq!(end.name, "message_end");
        assert!(end.data["error"].as_str().is_some());
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_workflow() {
        let wf = Arc::new(workflow(
            MockModel::replying(PLAN),
            MockModel::replying("never sent"),
            true,
        ));

        let first: Vec<ChatEvent> = chat_events(Arc::clone(&wf), "rates?".into(), stream_config(4))
            .take(2)
            .collect()
            .await;

        assert_eq!(names(&first), ["planning_start", "planning_complete"]);
        assert!(wf.answerer().prompts().is_empty());
    }

    #[tokio::test]
    async fn sse_endpoint_streams_named_events() {
        let upstream = MockServer::start().await;
        let gemini_text = |text: &str| {
            json!({"candidates": [{"content": {"parts": [{"text": text}]}, "finishReason": "STOP"}]})
        };
        Mock::given(method("POST"))
            .and(path("/planner:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_text(PLAN)))
            .mount(&upstream)
            .await;
        Mock::given(method("POST"))
            .and(path("/answerer:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_text("Short answer.")))
            .mount(&upstream)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": [{"url": "https://www.cnbc.com/fed", "title": "Fed update", "markdown": "Rates held."}]
            })))
            .mount(&upstream)
            .await;

        let uri = upstream.uri();
        let base = spawn(AppState::new(
            answer_model_config(test_config()),
            None::<PerplexityClient>,
            Some(FirecrawlClient::with_base_url(Client::new(), &uri)),
            Some(gemini(&uri)),
        ))
        .await;

        let resp = Client::new()
            .post(format!("{base}/api/chat/stream"))
            .json(&json!({"message": "rates?"}))
            .send()
            .await
            .unwrap();
        assert_eq!(
            resp.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );
        let body = resp.text().await.unwrap();

        let events: Vec<&str> = body
            .lines()
            .filter_map(|line| line.strip_prefix("event: "))
            .collect();
        assert_eq!(events.first(), Some(&"planning_start"));
        assert_eq!(events[1], "planning_complete");
        assert_eq!(events[2], "message_start");
        assert!(events.contains(&"message_chunk"));
        assert_eq!(events.last(), Some(&"message_end"));
        assert!(body.contains("id: 1\n"));
    }

    #[tokio::test]
    async fn stream_rejects_empty_message() {
        let base = spawn(AppState::new(test_config(), None, None, None)).await;

        let resp = Client::new()
            .post(format!("{base}/api/chat/stream"))
            .json(&json!({"message": ""}))
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_rejects_non_json_body() {
        let base = spawn(AppState::new(test_config(), None, None, None)).await;

        let resp = Client::new()
            .post(format!("{base}/api/chat/stream"))
            .body("message=rates")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
    }
}
