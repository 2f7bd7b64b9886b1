//! Content aggregation: fetch each hit and keep its best-matching section.

use futures::future::join_all;
use tracing::{debug, instrument};

use quarry_search::PageFetcher;
use quarry_shared::{AggregatedDocument, DocumentSummary, Result};

use crate::context::RequestContext;
use crate::similarity::Similarity;

/// Fetch every summary concurrently and pair it with its best section.
///
/// Output order matches input order and `paragraph_order` is `index + 1`.
/// A failed fetch yields an empty `content` rather than dropping the entry.
/// Sections are scored against the summary's description or title, or the
/// page's own title when the summary carries neither.
#[instrument(skip_all, fields(documents = summaries.len()))]
pub async fn aggregate(
    ctx: &RequestContext,
    fetcher: &dyn PageFetcher,
    similarity: &dyn Similarity,
    summaries: &[DocumentSummary],
) -> Result<Vec<AggregatedDocument>> {
    ctx.check_cancelled()?;
    ctx.log(format!("读取 {} 个页面", summaries.len()));

    let pages = join_all(summaries.iter().map(|s| fetcher.fetch(&s.url))).await;

    let documents: Vec<AggregatedDocument> = summaries
        .iter()
        .zip(pages)
        .enumerate()
        .map(|(index, (summary, page))| {
            if page.text.trim().is_empty() {
                ctx.log(format!("无法读取 {}", summary.url));
            }
            let reference = match summary.match_reference().trim() {
                "" => page.title.as_deref().unwrap_or_default(),
                own => own,
            };
            let content = best_section(similarity, &page.text, reference);
            let real_url = if page.final_url.is_empty() {
                summary.url.clone()
            } else {
                page.final_url
            };
            AggregatedDocument {
                summary: summary.clone(),
                content,
                real_url,
                paragraph_order: index + 1,
            }
        })
        .collect();

    let filled = documents.iter().filter(|d| !d.content.is_empty()).count();
    debug!(filled, total = documents.len(), "aggregation done");
    Ok(documents)
}

/// The section of `text` scoring highest against `reference`.
///
/// Ties go to the earlier section.
pub fn best_section(similarity: &dyn Similarity, text: &str, reference: &str) -> String {
    let mut best: Option<(f64, String)> = None;

    for section in quarry_markdown::split_sections(text) {
        let score = similarity.score(reference, &section);
        if best.as_ref().is_none_or(|(top, _)| score > *top) {
            best = Some((score, section));
        }
    }

    best.map(|(_, section)| section).unwrap_or_default()
}
