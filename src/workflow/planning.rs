use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::markdown::single_line;
use crate::provider::{LanguageModel, ProviderError, ResponseFormat};

const FALLBACK_FOCUS: &str = "direct answer to the original question";

/// The planning model's decomposition of a question into searchable parts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchPlan {
    pub original_question: String,
    pub sub_questions: Vec<String>,
    pub research_focus: String,
}

impl ResearchPlan {
    /// Searches the question as asked.
    pub fn fallback(question: &str) -> Self {
        Self {
            original_question: question.to_string(),
            sub_questions: vec![question.to_string()],
            research_focus: FALLBACK_FOCUS.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    #[error("planning model failed: {0}")]
    Model(#[from] ProviderError),

    #[error("planning response is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("planning response contained no sub-questions")]
    NoSubQuestions,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlan {
    #[serde(default)]
    sub_questions: Vec<String>,
    #[serde(default)]
    research_focus: Option<String>,
}

fn planning_prompt(question: &str, max_sub_questions: usize) -> String {
    format!(
        "You are a financial research planner. Break the user's question into at most \
{max_sub_questions} focused sub-questions that can each be answered by a web search \
for current financial data. Prefer concrete figures, dates and institutions.\n\n\
Respond with JSON only, in this shape:\n\
{{\"originalQuestion\": string, \"subQuestions\": [string], \"researchFocus\": string}}\n\n\
Question: {question}"
    )
}

pub async fn plan_research<L: LanguageModel>(
    model: &L,
    question: &str,
    max_sub_questions: usize,
) -> Result<ResearchPlan, PlanningError> {
    let prompt = planning_prompt(question, max_sub_questions);
    let raw = model.generate(&prompt, ResponseFormat::Json).await?;
    parse_plan(&raw, question, max_sub_questions)
}

/// Parses the model's JSON, tolerating a surrounding Markdown code fence.
/// Blank sub-questions are dropped and the rest capped.
pub(crate) fn parse_plan(
    raw: &str,
    question: &str,
    max_sub_questions: usize,
) -> Result<ResearchPlan, PlanningError> {
    let parsed: RawPlan = serde_json::from_str(strip_code_fence(raw))?;

    let sub_questions: Vec<String> = parsed
        .sub_questions
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .take(max_sub_questions)
        .map(str::to_string)
        .collect();
    if sub_questions.is_empty() {
        return Err(PlanningError::NoSubQuestions);
    }
    debug!(count = sub_questions.len(), "research plan parsed");

    Ok(ResearchPlan {
        original_question: question.to_string(),
        sub_questions,
        research_focus: parsed
            .research_focus
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| FALLBACK_FOCUS.to_string()),
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Markdown rendering of a plan, used in prompts and stream events.
pub fn summarize_plan(plan: &ResearchPlan) -> String {
    let mut out = format!(
        "### Research plan: {}\n\nFocus: {}\n\n",
        single_line(&plan.original_question),
        plan.research_focus
    );
    for (i, q) in plan.sub_questions.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, q));
    }
    out
}
