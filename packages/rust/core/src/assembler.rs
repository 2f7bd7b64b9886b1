//! Final prompt assembly.
//!
//! Renders either the aggregated documents or the refined fact set into a
//! reference block bounded by the budget, then wraps it in a fixed answer
//! instruction followed by the question. Output depends only on the inputs.

use tracing::{debug, instrument};

use quarry_shared::{AggregatedDocument, RefinedFactSet, text};

use crate::context::RequestContext;

const ANSWER_INSTRUCTIONS: &str = "Answer the question using the references below.
Cite the references you rely on by their number, like [1].
If the references do not contain the answer, say so instead of guessing.
Answer in the language of the question.";

/// Limits applied while assembling.
#[derive(Debug, Clone, Copy)]
pub struct AssembleOptions {
    /// Maximum characters in the reference block.
    pub budget: usize,
    /// Documents beyond this many are not rendered.
    pub document_limit: usize,
}

/// Build the answer prompt from aggregated documents, in order.
///
/// Sections are appended while they fit the budget. The first section that
/// would cross it is cut at the exact character offset; its remainder and all
/// later documents are dropped.
#[instrument(skip_all, fields(documents = docs.len(), budget = opts.budget))]
pub fn assemble_from_documents(
    ctx: &RequestContext,
    docs: &[AggregatedDocument],
    question: &str,
    opts: AssembleOptions,
) -> String {
    let shown = &docs[..docs.len().min(opts.document_limit)];
    let mut buffer = String::new();
    let mut running = 0usize;

    for (index, doc) in shown.iter().enumerate() {
        let section = render_section(index + 1, doc);
        let len = text::char_len(&section);

        if running + len <= opts.budget {
            buffer.push_str(&section);
            running += len;
            continue;
        }

        let room = opts.budget - running;
        let (head, rest) = text::split_at_chars(&section, room);
        buffer.push_str(head);
        let skipped = shown.len() - index - 1;
        ctx.log(format!(
            "参考资料超出预算，截断第 {} 篇的 {} 个字符并舍弃其后 {skipped} 篇",
            index + 1,
            text::char_len(rest)
        ));
        break;
    }

    debug!(len = text::char_len(&buffer), "document references rendered");
    wrap(buffer.trim_end(), question)
}

/// Build the answer prompt from the refined fact set and its sources.
#[instrument(skip_all, fields(urls = facts.urls.len(), budget = budget))]
pub fn assemble_from_facts(
    ctx: &RequestContext,
    facts: &RefinedFactSet,
    question: &str,
    budget: usize,
) -> String {
    let mut block = facts.fact.trim().to_string();
    if !facts.urls.is_empty() {
        block.push_str("\n\nSources:");
        for (i, url) in facts.urls.iter().enumerate() {
            block.push_str(&format!("\n[{}] {url}", i + 1));
        }
    }

    let len = text::char_len(&block);
    if len > budget {
        ctx.log(format!("事实超出预算，截断 {} 个字符", len - budget));
        block = text::truncate_chars(&block, budget).to_string();
    }

    wrap(&block, question)
}

/// One numbered document section, including its trailing blank line.
pub fn render_section(number: usize, doc: &AggregatedDocument) -> String {
    let summary = &doc.summary;
    let mut header = format!(
        "[{number}] Source: {} (paragraph {}",
        summary.url, doc.paragraph_order
    );
    if let Some(date) = summary.date.as_deref().filter(|d| !d.is_empty()) {
        header.push_str(&format!(", {date}"));
    }
    header.push(')');

    let mut section = format!("{header}\nTitle: {}\n", summary.title);
    if !summary.description.trim().is_empty() {
        section.push_str(&format!("Description: {}\n", summary.description.trim()));
    }
    if !doc.content.trim().is_empty() {
        section.push_str(doc.content.trim());
        section.push('\n');
    }
    section.push('\n');
    section
}

fn wrap(references: &str, question: &str) -> String {
    format!(
        "{ANSWER_INSTRUCTIONS}\n\n<references>\n{references}\n</references>\n\nQuestion: {question}"
    )
}
