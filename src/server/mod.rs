//! HTTP surface.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Full research workflow, JSON answer |
//! | `POST` | `/api/chat/stream` | Same workflow as Server-Sent Events |
//! | `GET`  | `/api/chat/status` | Version, features, config, active searches |
//! | `POST` | `/api/search` | Direct single or batch search |
//! | `GET`  | `/api/search/active` | Tracked search operations |
//! | `POST` | `/api/search/{id}/cancel` | Advisory cancel |
//!
//! Errors use `{"error": {"code": .., "message": ..}}`.

mod chat;
mod errors;
mod params;
mod search;
mod stream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use reqwest::Client;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::firecrawl::FirecrawlClient;
use crate::gemini::GeminiClient;
use crate::perplexity::PerplexityClient;
use crate::results::ResultsProcessor;
use crate::search::SearchOrchestrator;
use crate::workflow::Workflow;

use errors::{ApiError, unavailable};

/// TCP connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Global HTTP client timeout covering DNS + connect + response body.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub type Orchestrator = SearchOrchestrator<PerplexityClient, FirecrawlClient>;
pub type ChatWorkflow = Workflow<GeminiClient, PerplexityClient, FirecrawlClient>;

/// Services shared by every handler, built once in `main`.
pub struct AppState {
    config: Config,
    search: Arc<Orchestrator>,
    /// `None` without a Gemini key; chat endpoints then answer 503.
    workflow: Option<Arc<ChatWorkflow>>,
}

impl AppState {
    /// Builds the shared HTTP client and every adapter the configuration
    /// enables. Missing keys disable the matching feature with a warning.
    pub fn from_config(config: Config) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(HTTP_TIMEOUT)
            .build()?;

        let perplexity = if config.perplexity.is_active() {
            PerplexityClient::from_config(http.clone(), &config.perplexity)
                .inspect_err(|e| warn!("Perplexity search not available: {e}"))
                .ok()
        } else {
            info!(enabled = config.perplexity.enabled, "Perplexity search off");
            None
        };
        let firecrawl = if config.firecrawl.is_active() {
            FirecrawlClient::from_config(http.clone(), &config.firecrawl)
                .inspect_err(|e| warn!("Firecrawl search not available: {e}"))
                .ok()
        } else {
            info!(enabled = config.firecrawl.enabled, "Firecrawl search off");
            None
        };
        let gemini = GeminiClient::from_config(http, &config.gemini, &config.gemini.planning_model)
            .inspect_err(|e| warn!("chat not available: {e}"))
            .ok();

        Ok(Self::new(config, perplexity, firecrawl, gemini))
    }

    /// `gemini` is the planning client; the answering client is derived from
    /// it with the configured answer model.
    pub fn new(
        config: Config,
        perplexity: Option<PerplexityClient>,
        firecrawl: Option<FirecrawlClient>,
        gemini: Option<GeminiClient>,
    ) -> Self {
        let search = Arc::new(SearchOrchestrator::new(
            perplexity,
            firecrawl,
            config.search.clone(),
        ));
        let workflow = gemini.map(|planner| {
            let answerer = planner.clone().with_model(&config.gemini.answer_model);
            let processor = config
                .processing
                .enabled
                .then(|| ResultsProcessor::new(&config.processing));
            Arc::new(Workflow::new(
                planner,
                answerer,
                Arc::clone(&search),
                processor,
                config.workflow.clone(),
            ))
        });
        match &workflow {
            Some(wf) => info!(
                providers = ?search.enabled_providers(),
                planning_model = wf.planner().model(),
                answer_model = wf.answerer().model(),
                "services ready"
            ),
            None => info!(providers = ?search.enabled_providers(), "services ready, chat disabled"),
        }
        Self {
            config,
            search,
            workflow,
        }
    }

    fn workflow(&self) -> Result<Arc<ChatWorkflow>, ApiError> {
        self.workflow
            .clone()
            .ok_or_else(|| unavailable("chat_unavailable", "chat requires GEMINI_API_KEY"))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat::handle_chat))
        .route("/api/chat/stream", post(stream::handle_chat_stream))
        .route("/api/chat/status", get(chat::handle_status))
        .route("/api/search", post(search::handle_search))
        .route("/api/search/active", get(search::handle_active))
        .route("/api/search/{id}/cancel", post(search::handle_cancel))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, bind: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(Arc::new(state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Defaults with instant streaming and a short search timeout.
    pub(crate) fn test_config() -> Config {
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.stream.chunk_size = 8;
        config.stream.chunk_delay = Duration::ZERO;
        config.search.timeout = Duration::from_secs(2);
        config.search.batch_delay = Duration::ZERO;
        config
    }

    pub(crate) async fn spawn(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(Arc::new(state))).await.unwrap();
        });
        format!("http://{addr}")
    }

    pub(crate) fn gemini(server_uri: &str) -> GeminiClient {
        GeminiClient::with_base_url(Client::new(), server_uri).with_model("planner")
    }

    pub(crate) fn answer_model_config(mut config: Config) -> Config {
        config.gemini.answer_model = "answerer".into();
        config
    }
}
