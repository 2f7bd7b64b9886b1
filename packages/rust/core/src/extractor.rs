//! Fact extraction: budgeted batches of documents → structured facts.
//!
//! Documents are serialized into reference objects and packed greedily into
//! batches whose JSON array stays under the budget. Batches run in groups of
//! `max_concurrent_tasks`; each group finishes before the next starts. A
//! response counts as valid when its JSON carries an `answer` key, even an
//! empty one. Only when no response of a whole pass is valid is the pass
//! repeated, up to `max_attempts` times, after which the stage gives up with
//! no facts.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use quarry_shared::{AggregatedDocument, ExtractedFact, PipelineConfig, QuarryError, Result, text};

use crate::batching::greedy_batches;
use crate::context::RequestContext;
use crate::json::extract_json;
use crate::llm::{ChatMessage, LlmClient};
use crate::retry::with_retries;

const EXTRACTION_PROMPT: &str = "You extract facts that help answer a question.
You are given a JSON array of reference passages. Each has a `part` number, a `title`,
the passage `content`, its source `url`, a `paragraphOrder` and an optional `date`.
List every fact from the passages that is relevant to the question. Keep numbers,
names, dates, code and links exactly as written. Do not invent facts.
Reply with JSON only, in this form:
{\"answer\": [{\"fact\": \"one self-contained fact\", \"url\": \"source url\", \"source\": \"part number\"}]}
If nothing is relevant, reply {\"answer\": []}.";

/// One document as presented to the model.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Reference {
    part: usize,
    title: String,
    content: String,
    url: String,
    paragraph_order: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct RawFact {
    #[serde(default)]
    fact: Option<String>,
    #[serde(default)]
    url: Option<OneOrMany>,
}

/// Extract facts relevant to `question` from `docs`.
///
/// Returns an empty list when nothing could be extracted; the only error is
/// cancellation.
#[instrument(skip_all, fields(documents = docs.len()))]
pub async fn extract_facts(
    ctx: &RequestContext,
    llm: &dyn LlmClient,
    config: &PipelineConfig,
    docs: &[AggregatedDocument],
    question: &str,
) -> Result<Vec<ExtractedFact>> {
    ctx.check_cancelled()?;

    let references = build_references(ctx, docs, config.budget);
    if references.is_empty() {
        ctx.log("没有可供提取的内容");
        return Ok(Vec::new());
    }

    for attempt in 1..=config.max_attempts.max(1) {
        ctx.check_cancelled()?;

        let batches = greedy_batches(references.iter(), config.budget, 1, |r| {
            serialized_len(r) + 1
        });
        ctx.log(format!("第 {attempt} 次提取事实，共 {} 个批次", batches.len()));

        let mut responses = Vec::new();
        for run in batches.chunks(config.max_concurrent_tasks.max(1)) {
            ctx.check_cancelled()?;
            let results = join_all(
                run.iter()
                    .map(|batch| extract_batch(ctx, llm, config.max_attempts, batch, question)),
            )
            .await;

            for result in results {
                match result {
                    Ok(texts) => responses.extend(texts),
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        warn!(error = %e, "extraction batch failed");
                        ctx.log(format!("一个提取批次失败: {e}"));
                    }
                }
            }
        }

        let mut any_valid = false;
        let mut facts = Vec::new();
        for raw in &responses {
            match parse_answer(raw) {
                Some(parsed) => {
                    any_valid = true;
                    facts.extend(parsed);
                }
                None => debug!(len = raw.len(), "response without an answer key"),
            }
        }

        if any_valid {
            info!(facts = facts.len(), attempt, "extraction done");
            ctx.log(format!("提取到 {} 条事实", facts.len()));
            return Ok(facts);
        }

        ctx.log(format!("第 {attempt} 次提取没有得到有效结果"));
    }

    ctx.log("事实提取失败，跳过");
    Ok(Vec::new())
}

/// One model call for one batch, retried on transport/model errors.
async fn extract_batch(
    ctx: &RequestContext,
    llm: &dyn LlmClient,
    max_attempts: usize,
    batch: &[&Reference],
    question: &str,
) -> Result<Vec<String>> {
    let payload = serde_json::to_string(batch)
        .map_err(|e| QuarryError::parse(format!("serialize batch: {e}")))?;

    let messages = [
        ChatMessage::system(EXTRACTION_PROMPT),
        ChatMessage::user(format!("Question: {question}\n\nReferences:\n{payload}")),
    ];

    with_retries(ctx.token(), max_attempts, "extract", || llm.complete(&messages)).await
}

/// Reference objects for every document with content, each fitted to the budget.
fn build_references(
    ctx: &RequestContext,
    docs: &[AggregatedDocument],
    budget: usize,
) -> Vec<Reference> {
    docs.iter()
        .filter(|doc| !doc.content.trim().is_empty())
        .enumerate()
        .map(|(index, doc)| {
            let reference = Reference {
                part: index + 1,
                title: doc.summary.title.clone(),
                content: doc.content.clone(),
                url: doc.summary.url.clone(),
                paragraph_order: doc.paragraph_order,
                date: doc.summary.date.clone(),
            };
            // Alone in a batch: "[" + reference + "]" must stay under budget.
            let limit = budget.saturating_sub(2);
            let before = reference_chars(&reference);
            let fitted = fit_reference(reference, limit);
            let after = reference_chars(&fitted);
            if after < before {
                ctx.log(format!(
                    "资料 {} 过长，已截断 {} 个字符",
                    doc.summary.url,
                    before - after
                ));
            }
            fitted
        })
        .collect()
}

/// Shrink the reference until it serializes shorter than `limit`.
///
/// Content goes first, then the title, then the date, and the URL only as a
/// last resort. A limit below the size of the empty skeleton cannot be met;
/// the reference comes back with every shrinkable field emptied.
fn fit_reference(mut reference: Reference, limit: usize) -> Reference {
    loop {
        let size = serialized_len(&reference);
        if size < limit {
            return reference;
        }
        let excess = size - limit + 1;
        if !reference.content.is_empty() {
            shrink(&mut reference.content, excess);
        } else if !reference.title.is_empty() {
            shrink(&mut reference.title, excess);
        } else if reference.date.is_some() {
            reference.date = None;
        } else if !reference.url.is_empty() {
            shrink(&mut reference.url, excess);
        } else {
            return reference;
        }
    }
}

fn shrink(field: &mut String, excess: usize) {
    let keep = text::char_len(field).saturating_sub(excess);
    *field = text::truncate_chars(field, keep).to_string();
}

fn reference_chars(reference: &Reference) -> usize {
    text::char_len(&reference.content)
        + text::char_len(&reference.title)
        + text::char_len(&reference.url)
        + reference.date.as_deref().map_or(0, text::char_len)
}

fn serialized_len<T: Serialize>(value: &T) -> usize {
    serde_json::to_string(value)
        .map(|s| text::char_len(&s))
        .unwrap_or(0)
}

/// Facts from one raw response, or `None` when the response has no `answer` key.
fn parse_answer(raw: &str) -> Option<Vec<ExtractedFact>> {
    let Value::Object(mut map) = extract_json(raw)? else {
        return None;
    };
    let answer = map.remove("answer")?;

    let items = match answer {
        Value::Array(items) => items,
        _ => Vec::new(),
    };

    Some(
        items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<RawFact>(item).ok())
            .filter_map(into_fact)
            .collect(),
    )
}

/// Keeps facts with non-empty text and at least one non-empty URL.
fn into_fact(raw: RawFact) -> Option<ExtractedFact> {
    let fact = raw.fact?.trim().to_string();
    if fact.is_empty() {
        return None;
    }

    let urls: Vec<String> = match raw.url? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    }
    .into_iter()
    .map(|u| u.trim().to_string())
    .filter(|u| !u.is_empty())
    .collect();

    if urls.is_empty() {
        return None;
    }
    Some(ExtractedFact { fact, urls })
}
