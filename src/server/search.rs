use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::Serialize;
use tracing::info;

use super::AppState;
use super::errors::{ApiError, bad_request, not_found};
use super::params::SearchParams;
use crate::search::orchestrator::ActiveSearch;
use crate::search::{BatchOptions, BatchResult, CombinedResult, SearchError, SearchOptions};

/// Upper bound on `queries` in one request.
const MAX_BATCH_QUERIES: usize = 20;

#[derive(Serialize)]
#[serde(untagged)]
pub(super) enum SearchResponse {
    Single(CombinedResult),
    Batch(BatchResult),
}

#[derive(Serialize)]
pub(super) struct ActiveResponse {
    count: usize,
    searches: Vec<ActiveSearch>,
}

#[derive(Serialize)]
pub(super) struct CancelResponse {
    id: String,
    cancelled: bool,
}

/// `queries` takes precedence over `query` and always yields batch shape.
pub(super) async fn handle_search(
    State(state): State<Arc<AppState>>,
    params: Result<Json<SearchParams>, JsonRejection>,
) -> Result<Json<SearchResponse>, ApiError> {
    let Json(params) = params?;
    let options = SearchOptions {
        timeout: params.timeout_ms.map(Duration::from_millis),
        allow_partial: params.allow_partial,
    };

    if !params.queries.is_empty() {
        let queries: Vec<String> = params
            .queries
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .collect();
        if queries.is_empty() {
            return Err(SearchError::EmptyQuery.into());
        }
        if queries.len() > MAX_BATCH_QUERIES {
            return Err(bad_request(format!(
                "at most {MAX_BATCH_QUERIES} queries per request, got {}",
                queries.len()
            )));
        }
        if state.search.enabled_providers().is_empty() {
            return Err(SearchError::NoProvidersEnabled.into());
        }
        let batch = state
            .search
            .execute_batch_search(
                &queries,
                &BatchOptions {
                    chunk_size: params.chunk_size,
                    delay: None,
                    search: options,
                },
            )
            .await;
        return Ok(Json(SearchResponse::Batch(batch)));
    }

    let query = params.query.unwrap_or_default();
    let result = state.search.execute_parallel_search(&query, &options).await?;
    Ok(Json(SearchResponse::Single(result)))
}

pub(super) async fn handle_active(State(state): State<Arc<AppState>>) -> Json<ActiveResponse> {
    let searches = state.search.active_searches();
    Json(ActiveResponse {
        count: searches.len(),
        searches,
    })
}

pub(super) async fn handle_cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    if !state.search.cancel_search(&id) {
        return Err(not_found(format!("no search with id {id}")));
    }
    info!(search_id = %id, "search cancelled");
    Ok(Json(CancelResponse { id, cancelled: true }))
}
