//! Refinement: compact extracted facts until they fit the budget.

use std::collections::HashSet;
use std::sync::LazyLock;

use futures::future::join_all;
use regex::Regex;
use tracing::{info, instrument, warn};

use quarry_shared::{ExtractedFact, PipelineConfig, RefinedFactSet, Result, text};

use crate::batching::greedy_batches;
use crate::context::RequestContext;
use crate::llm::{ChatMessage, LlmClient};
use crate::retry::with_retries;

/// Compaction rounds before the remaining text is returned as-is.
pub const MAX_ROUNDS: usize = 3;

/// Separator the model is asked to put between merged facts.
const FACT_DELIMITER: &str = "---";

const REFINE_PROMPT: &str = "You merge and de-duplicate notes gathered to answer a question.
Combine facts that say the same thing, drop exact repetition, and shorten wording,
but keep every distinct fact, number, name, date, link and code snippet.
Write each merged fact as its own paragraph and put a line containing only --- between facts.
Reply with the merged facts only.";

/// Compact `facts` into a single set that fits `config.budget` when possible.
///
/// Short input is returned joined, with no model calls. Otherwise up to
/// [`MAX_ROUNDS`] rounds re-batch the current pieces, ask the model to merge
/// each batch, and replace the pieces with the outputs. A batch whose call
/// fails is dropped from its round. The result is not guaranteed to fit.
#[instrument(skip_all, fields(facts = facts.len()))]
pub async fn refine(
    ctx: &RequestContext,
    llm: &dyn LlmClient,
    config: &PipelineConfig,
    facts: &[ExtractedFact],
    question: &str,
) -> Result<RefinedFactSet> {
    let urls = union_urls(facts);
    let mut pieces: Vec<String> = facts.iter().map(|f| f.fact.clone()).collect();
    let budget = config.budget;

    let mut total = total_len(&pieces);
    if total <= budget {
        return Ok(RefinedFactSet {
            fact: pieces.join("\n\n"),
            urls,
        });
    }

    ctx.log(format!("事实共 {total} 字，超出预算 {budget}，开始压缩"));

    for round in 1..=MAX_ROUNDS {
        ctx.check_cancelled()?;

        // Each piece must fit a batch on its own.
        let max_piece = budget.saturating_sub(3).max(1);
        let chunks: Vec<String> = pieces
            .iter()
            .flat_map(|p| text::chunk_chars(p, max_piece))
            .collect();
        let batches = greedy_batches(chunks, budget, 0, |p| text::char_len(p) + 2);

        let mut next = Vec::new();
        let mut dropped = 0usize;
        for run in batches.chunks(config.max_concurrent_tasks.max(1)) {
            ctx.check_cancelled()?;
            let results = join_all(
                run.iter()
                    .map(|batch| refine_batch(ctx, llm, config.max_attempts, batch, question)),
            )
            .await;

            for result in results {
                match result {
                    Ok(merged) => next.extend(merged),
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        warn!(round, error = %e, "refinement batch dropped");
                        dropped += 1;
                    }
                }
            }
        }

        if dropped > 0 {
            ctx.log(format!("第 {round} 轮压缩丢弃了 {dropped} 个失败批次"));
        }
        if next.is_empty() {
            ctx.log(format!("第 {round} 轮压缩没有产出，保留上一轮结果"));
            break;
        }

        pieces = next;
        total = total_len(&pieces);
        ctx.log(format!("第 {round} 轮压缩后共 {total} 字"));
        if total <= budget {
            break;
        }
    }

    if total > budget {
        info!(total, budget, "facts still over budget after refinement");
    }

    Ok(RefinedFactSet {
        fact: pieces.join("\n\n"),
        urls,
    })
}

async fn refine_batch(
    ctx: &RequestContext,
    llm: &dyn LlmClient,
    max_attempts: usize,
    batch: &[String],
    question: &str,
) -> Result<Vec<String>> {
    let messages = [
        ChatMessage::system(format!("{REFINE_PROMPT}\n\nQuestion: {question}")),
        ChatMessage::user(batch.join("\n\n")),
    ];

    let responses =
        with_retries(ctx.token(), max_attempts, "refine", || llm.complete(&messages)).await?;

    Ok(responses
        .first()
        .map(|response| split_facts(response))
        .unwrap_or_default())
}

/// Split a merged response back into fact-sized pieces.
fn split_facts(response: &str) -> Vec<String> {
    static DELIMITER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(&format!(r"(?m)^[ \t]*{FACT_DELIMITER}[ \t]*$")).expect("valid regex")
    });

    DELIMITER_RE
        .split(response)
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

/// Every URL across `facts`, first appearance first.
fn union_urls(facts: &[ExtractedFact]) -> Vec<String> {
    let mut seen = HashSet::new();
    facts
        .iter()
        .flat_map(|f| f.urls.iter())
        .filter(|url| seen.insert(url.as_str()))
        .cloned()
        .collect()
}

fn total_len(pieces: &[String]) -> usize {
    pieces.iter().map(|p| text::char_len(p)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PacedLlm, ScriptedLlm, context};
    use quarry_shared::QuarryError;

    fn fact(text: &str, urls: &[&str]) -> ExtractedFact {
        ExtractedFact {
            fact: text.to_string(),
            urls: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    /// Ten facts of 5,000 chars each.
    fn large_facts() -> Vec<ExtractedFact> {
        (0..10)
            .map(|i| fact(&"f".repeat(5_000), &[format!("https://s{i}").as_str()]))
            .collect()
    }

    #[tokio::test]
    async fn short_input_is_joined_without_model_calls() {
        let (ctx, _sink) = context();
        let llm = ScriptedLlm::fixed("unused");
        let facts = vec![
            fact("Tokio is a runtime.", &["https://tokio.rs", "https://docs.rs/tokio"]),
            fact("It schedules tasks.", &["https://tokio.rs"]),
        ];

        let refined = refine(&ctx, &llm, &config(), &facts, "q").await.unwrap();

        assert_eq!(refined.fact, "Tokio is a runtime.\n\nIt schedules tasks.");
        assert_eq!(refined.urls, vec!["https://tokio.rs", "https://docs.rs/tokio"]);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn halving_rounds_converge_within_two_rounds() {
        let (ctx, sink) = context();
        let llm = ScriptedLlm::new(|_, messages| {
            let input = text::char_len(&messages[1].content);
            Ok(vec!["h".repeat(input / 2)])
        });

        let refined = refine(&ctx, &llm, &config(), &large_facts(), "q").await.unwrap();

        assert!(text::char_len(&refined.fact) <= quarry_shared::DEFAULT_BUDGET);
        assert!(sink.contains("第 1 轮压缩后"));
        assert!(!sink.contains("第 3 轮"));
        assert_eq!(refined.urls.len(), 10);
    }

    #[tokio::test]
    async fn non_shrinking_model_stops_after_three_rounds() {
        let (ctx, sink) = context();
        let llm = ScriptedLlm::new(|_, messages| Ok(vec![messages[1].content.clone()]));

        let refined = refine(&ctx, &llm, &config(), &large_facts(), "q").await.unwrap();

        assert!(text::char_len(&refined.fact) > quarry_shared::DEFAULT_BUDGET);
        assert!(sink.contains("第 3 轮压缩后"));
        // 50,000 chars across a 28,720 budget is two batches per round.
        assert_eq!(llm.calls(), 2 * MAX_ROUNDS);
    }

    #[tokio::test]
    async fn batches_run_in_joined_groups_of_max_concurrent_tasks() {
        let (ctx, _sink) = context();
        let llm = PacedLlm::new("merged");
        let cfg = PipelineConfig {
            max_concurrent_tasks: 2,
            ..config()
        };
        // 20,000 chars each: no two share a batch, so five batches.
        let facts: Vec<_> = (0..5)
            .map(|i| fact(&"f".repeat(20_000), &[format!("https://s{i}").as_str()]))
            .collect();

        let refined = refine(&ctx, &llm, &cfg, &facts, "q").await.unwrap();

        assert_eq!(llm.peak(), 2);
        assert_eq!(llm.groups(), vec![2, 2, 1]);
        assert_eq!(refined.fact, vec!["merged"; 5].join("\n\n"));
    }

    #[tokio::test]
    async fn failed_batches_are_dropped() {
        let (ctx, sink) = context();
        let llm = ScriptedLlm::new(|_, messages| {
            if messages[1].content.len() > 20_000 {
                Err(QuarryError::Llm("too big".into()))
            } else {
                Ok(vec!["short".into()])
            }
        });
        // One batch of 25,000 chars fails; the 5,000-char batch survives.
        let facts = vec![
            fact(&"a".repeat(12_000), &["https://a"]),
            fact(&"b".repeat(13_000), &["https://b"]),
            fact(&"c".repeat(5_000), &["https://c"]),
        ];

        let refined = refine(&ctx, &llm, &config(), &facts, "q").await.unwrap();

        assert_eq!(refined.fact, "short");
        assert!(sink.contains("丢弃了 1 个失败批次"));
        assert_eq!(refined.urls, vec!["https://a", "https://b", "https://c"]);
    }

    #[tokio::test]
    async fn round_without_output_keeps_previous_pieces() {
        let (ctx, sink) = context();
        let llm = ScriptedLlm::failing();
        let facts = large_facts();

        let refined = refine(&ctx, &llm, &config(), &facts, "q").await.unwrap();

        assert_eq!(text::char_len(&refined.fact), 50_000 + 9 * 2);
        assert!(sink.contains("没有产出"));
    }

    #[tokio::test]
    async fn cancellation_is_checked_each_round() {
        let (ctx, _sink) = context();
        ctx.cancel();
        let llm = ScriptedLlm::fixed("x");

        let err = refine(&ctx, &llm, &config(), &large_facts(), "q")
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(llm.calls(), 0);
    }

    #[test]
    fn responses_split_on_delimiter_lines() {
        let pieces = split_facts("first fact\n---\nsecond fact\n  ---  \n\nthird --- inline\n---\n");
        assert_eq!(pieces, vec!["first fact", "second fact", "third --- inline"]);
    }
}
