//! Retrieval: run planned sub-queries against a search backend.

use std::collections::HashSet;

use tracing::{debug, instrument, warn};
use url::Url;

use quarry_search::SearchBackend;
use quarry_shared::{DocumentSummary, PlannedQuery, QuarryError, Result};

use crate::context::RequestContext;

/// Accumulated search hits, possibly cut short by cancellation.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub documents: Vec<DocumentSummary>,
    /// The token was tripped at a query boundary; `documents` holds what was
    /// collected before that point.
    pub cancelled: bool,
}

/// Retrieval parameters that vary per request.
#[derive(Debug, Clone)]
pub struct RetrieveOptions<'a> {
    pub path: &'a str,
    pub question: &'a str,
    pub limit: usize,
    pub rerank: bool,
}

/// Run `plans` in order until `limit` unique, non-ad results are collected.
///
/// Results are deduplicated by normalized URL and numbered from 1 in
/// discovery order. A failing sub-query is logged and skipped; the stage only
/// fails when every sub-query that ran failed. Reranking, when requested,
/// happens once after the loop against the original question.
#[instrument(skip_all, fields(backend = backend.name(), path = opts.path, limit = opts.limit))]
pub async fn retrieve(
    ctx: &RequestContext,
    backend: &dyn SearchBackend,
    plans: &[PlannedQuery],
    opts: &RetrieveOptions<'_>,
) -> Result<Retrieval> {
    let mut documents: Vec<DocumentSummary> = Vec::new();
    let mut seen = HashSet::new();
    let mut succeeded = 0usize;
    let mut last_error = None;

    for plan in plans {
        if documents.len() >= opts.limit {
            break;
        }
        if ctx.is_cancelled() {
            ctx.log("检索已中断");
            return Ok(Retrieval {
                documents,
                cancelled: true,
            });
        }

        let query = backend.rewrite_query(&plan.query).await;
        ctx.log(format!("搜索 {query}"));

        match backend.search(&query, opts.path).await {
            Ok(hits) => {
                succeeded += 1;
                let before = documents.len();
                for mut hit in hits {
                    if hit.is_ad || !seen.insert(dedup_key(&hit.url)) {
                        continue;
                    }
                    hit.id = documents.len() + 1;
                    documents.push(hit);
                }
                debug!(query = %query, added = documents.len() - before, "sub-query done");
            }
            Err(e) => {
                warn!(query = %query, error = %e, "sub-query failed");
                ctx.log(format!("搜索 {query} 失败: {e}"));
                last_error = Some(e);
            }
        }
    }

    if succeeded == 0 {
        if let Some(e) = last_error {
            return Err(QuarryError::Search(format!("all sub-queries failed: {e}")));
        }
    }

    documents.truncate(opts.limit);

    if opts.rerank && documents.len() > 1 {
        documents = backend.rerank(documents, opts.question).await;
        ctx.log("已按原问题重新排序");
    }

    ctx.log(format!("找到 {} 条结果", documents.len()));
    Ok(Retrieval {
        documents,
        cancelled: false,
    })
}

/// Identity key for deduplication: the URL without fragment or trailing slash.
fn dedup_key(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.as_str().trim_end_matches('/').to_string()
        }
        Err(_) => raw.trim().trim_end_matches('/').to_string(),
    }
}
