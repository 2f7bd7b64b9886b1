//! Query planning: one user question → ordered search sub-queries.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use quarry_shared::{PlannedQuery, Result};

use crate::context::RequestContext;
use crate::json::extract_json;
use crate::llm::{ChatMessage, LlmClient};
use crate::retry::with_retries;

/// Upper bound on sub-queries taken from one plan.
const MAX_PLANNED_QUERIES: usize = 5;

const PLANNER_PROMPT: &str = "You plan web searches. Today is {date}.
Break the user's question into at most 5 search queries, most important first.
The first query should be the best single reformulation of the question.
Write queries in the language of the question.
Reply with JSON only, in this form:
{\"plan\": [{\"query\": \"search terms\", \"log\": \"short note on why\"}]}";

#[derive(Debug, Deserialize)]
struct RawStep {
    #[serde(default)]
    query: String,
    #[serde(default)]
    log: Option<String>,
}

/// Progress note for a query the planner did not annotate.
pub fn default_log(query: &str) -> String {
    format!("计划执行 {query}")
}

/// The plan used whenever planning fails: search the question as-is.
pub fn fallback_plan(question: &str) -> Vec<PlannedQuery> {
    vec![PlannedQuery {
        query: question.to_string(),
        log: default_log(question),
    }]
}

/// Plan sub-queries for `question`.
///
/// Never fails on model problems: without an LLM, or when the model output is
/// unusable, the plan is the question itself. Only cancellation is an error.
#[instrument(skip_all, fields(question = %question))]
pub async fn plan(
    ctx: &RequestContext,
    llm: Option<&dyn LlmClient>,
    max_attempts: usize,
    question: &str,
) -> Result<Vec<PlannedQuery>> {
    ctx.check_cancelled()?;

    let Some(llm) = llm else {
        return Ok(fallback(ctx, question, "未配置模型"));
    };

    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    let messages = [
        ChatMessage::system(PLANNER_PROMPT.replace("{date}", &date)),
        ChatMessage::user(question),
    ];

    let responses = match with_retries(ctx.token(), max_attempts, "plan", || {
        llm.complete(&messages)
    })
    .await
    {
        Ok(responses) => responses,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            warn!(error = %e, "planning call failed");
            return Ok(fallback(ctx, question, "规划失败"));
        }
    };

    let steps = responses
        .iter()
        .find_map(|raw| parse_plan(raw).filter(|steps| !steps.is_empty()));

    match steps {
        Some(steps) => {
            for step in &steps {
                ctx.log(&step.log);
            }
            debug!(queries = steps.len(), "plan ready");
            Ok(steps)
        }
        None => Ok(fallback(ctx, question, "规划结果无法解析")),
    }
}

fn fallback(ctx: &RequestContext, question: &str, reason: &str) -> Vec<PlannedQuery> {
    let plan = fallback_plan(question);
    ctx.log(format!("{reason}，直接搜索原问题"));
    ctx.log(&plan[0].log);
    plan
}

/// Accepts `{"plan": [...]}` or a bare array of steps.
fn parse_plan(raw: &str) -> Option<Vec<PlannedQuery>> {
    let value = extract_json(raw)?;
    let steps = match value {
        Value::Object(mut map) => map.remove("plan")?,
        array @ Value::Array(_) => array,
        _ => return None,
    };
    let steps: Vec<RawStep> = serde_json::from_value(steps).ok()?;

    Some(
        steps
            .into_iter()
            .filter_map(|step| {
                let query = step.query.trim().to_string();
                if query.is_empty() {
                    return None;
                }
                let log = step
                    .log
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| default_log(&query));
                Some(PlannedQuery { query, log })
            })
            .take(MAX_PLANNED_QUERIES)
            .collect(),
    )
}
