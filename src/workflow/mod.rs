//! Workflow coordinator: planning, search, processing and answering, with a
//! per-stage trace. Every stage except answering has a fallback.

pub(crate) mod answer;
pub(crate) mod planning;

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::WorkflowConfig;
use crate::provider::{LanguageModel, ProviderError, ResponseFormat, SearchProvider};
use crate::results::ResultsProcessor;
use crate::search::{BatchOptions, BatchResult, SearchOptions, SearchOrchestrator};

use answer::{EvidenceItem, MAX_EVIDENCE, ResearchEvidence, answer_prompt};
pub use planning::ResearchPlan;
use planning::plan_research;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("answer generation failed: {0}")]
    Answer(#[source] ProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Planning,
    Search,
    Processing,
    Answering,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    pub stage: Stage,
    pub success: bool,
    pub duration_ms: u64,
    pub detail: String,
}

impl StageRecord {
    fn new(stage: Stage, success: bool, started: Instant, detail: impl Into<String>) -> Self {
        Self {
            stage,
            success,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Success,
    Fallback,
}

/// Planning stage output. Planning never fails the workflow: on error the
/// plan is the fallback and `error` says why.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: ResearchPlan,
    pub record: StageRecord,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutcome {
    pub plan: ResearchPlan,
    #[serde(skip)]
    pub answer: String,
    pub status: WorkflowStatus,
    pub trace: Vec<StageRecord>,
    /// Items handed to the answering model.
    pub evidence: Vec<EvidenceItem>,
    pub sub_questions_searched: usize,
    pub searches_failed: usize,
}

pub struct Workflow<L, P, F> {
    planner: L,
    answerer: L,
    search: Arc<SearchOrchestrator<P, F>>,
    /// `None` when result processing is switched off.
    processor: Option<ResultsProcessor>,
    config: WorkflowConfig,
}

impl<L, P, F> Workflow<L, P, F>
where
    L: LanguageModel + Sync,
    P: SearchProvider + Send + Sync,
    F: SearchProvider + Send + Sync,
{
    pub fn new(
        planner: L,
        answerer: L,
        search: Arc<SearchOrchestrator<P, F>>,
        processor: Option<ResultsProcessor>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            planner,
            answerer,
            search,
            processor,
            config,
        }
    }

    pub fn planner(&self) -> &L {
        &self.planner
    }

    pub fn answerer(&self) -> &L {
        &self.answerer
    }

    pub async fn run(&self, question: &str) -> Result<WorkflowOutcome, WorkflowError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(WorkflowError::EmptyQuestion);
        }
        let planned = self.plan(question).await;
        self.run_planned(question, planned).await
    }

    pub async fn plan(&self, question: &str) -> PlanOutcome {
        let started = Instant::now();
        match plan_research(&self.planner, question, self.config.max_sub_questions).await {
            Ok(plan) => {
                let detail = format!("{} sub-questions", plan.sub_questions.len());
                PlanOutcome {
                    plan,
                    record: StageRecord::new(Stage::Planning, true, started, detail),
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "planning failed, searching the original question");
                PlanOutcome {
                    plan: ResearchPlan::fallback(question),
                    record: StageRecord::new(Stage::Planning, false, started, e.to_string()),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Runs search, processing and answering against an existing plan.
    pub async fn run_planned(
        &self,
        question: &str,
        planned: PlanOutcome,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(WorkflowError::EmptyQuestion);
        }
        let PlanOutcome { plan, record, .. } = planned;
        let mut trace = vec![record];

        let started = Instant::now();
        let batch = self.search_stage(&plan.sub_questions).await;
        let search_ok = !batch.successful.is_empty();
        trace.push(StageRecord::new(
            Stage::Search,
            search_ok,
            started,
            format!("{} of {} searches usable", batch.successful.len(), batch.total),
        ));

        let started = Instant::now();
        let evidence = self.processing_stage(&batch);
        let ranked = matches!(evidence, ResearchEvidence::Ranked(_));
        trace.push(StageRecord::new(
            Stage::Processing,
            ranked,
            started,
            format!(
                "{} {} items",
                evidence.count(),
                if ranked { "ranked" } else { "unranked" }
            ),
        ));

        let started = Instant::now();
        let items = evidence.top(MAX_EVIDENCE);
        let prompt = answer_prompt(question, &plan, &items);
        let answer = match self.answerer.generate(&prompt, ResponseFormat::Text).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "answer generation failed");
                return Err(WorkflowError::Answer(e));
            }
        };
        trace.push(StageRecord::new(
            Stage::Answering,
            true,
            started,
            format!("{} evidence items", items.len()),
        ));

        let status = if trace.iter().all(|r| r.success) {
            WorkflowStatus::Success
        } else {
            WorkflowStatus::Fallback
        };
        info!(?status, evidence = items.len(), "workflow finished");

        Ok(WorkflowOutcome {
            sub_questions_searched: batch.total,
            searches_failed: batch.failed.len(),
            plan,
            answer,
            status,
            trace,
            evidence: items,
        })
    }

    async fn search_stage(&self, sub_questions: &[String]) -> BatchResult {
        match sub_questions {
            [single] => {
                let started_at = Utc::now();
                let outcome = self
                    .search
                    .execute_parallel_search(single, &SearchOptions::default())
                    .await;
                BatchResult::single(single, outcome, started_at)
            }
            many => {
                let options = BatchOptions {
                    chunk_size: Some(self.config.max_concurrent_searches),
                    ..BatchOptions::default()
                };
                self.search.execute_batch_search(many, &options).await
            }
        }
    }

    fn processing_stage(&self, batch: &BatchResult) -> ResearchEvidence {
        let Some(processor) = &self.processor else {
            return ResearchEvidence::unranked(batch);
        };
        let processed = processor.process(&batch.successful);
        match &processed.error {
            Some(error) => {
                warn!(%error, "processing failed, using unranked results");
                ResearchEvidence::unranked(batch)
            }
            None => ResearchEvidence::Ranked(processed),
        }
    }
}
