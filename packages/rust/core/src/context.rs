//! Per-request state threaded through every pipeline stage.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use quarry_shared::{
    AggregatedDocument, DocumentSummary, ExtractedFact, PlannedQuery, QuarryError, RefinedFactSet,
    Result,
};

// ---------------------------------------------------------------------------
// Log sinks
// ---------------------------------------------------------------------------

/// Receiver for the human-readable progress lines a request emits.
pub trait LogSink: Send + Sync {
    fn log(&self, line: &str);
}

/// Discards every line (headless/test usage).
pub struct SilentSink;

impl LogSink for SilentSink {
    fn log(&self, _line: &str) {}
}

/// Keeps every line in memory.
#[derive(Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines logged so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Whether any logged line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|l| l.contains(needle))
    }
}

impl LogSink for CollectingSink {
    fn log(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Results accumulator
// ---------------------------------------------------------------------------

/// Intermediate artifacts accumulated over one request.
///
/// Each stage owns exactly one field.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResults {
    pub planned_queries: Vec<PlannedQuery>,
    pub search_results: Vec<DocumentSummary>,
    pub details_search_results: Vec<AggregatedDocument>,
    pub parsed_facts: Vec<ExtractedFact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refined_facts: Option<RefinedFactSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_prompt: Option<String>,
}

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Cancellation state, results accumulator, and log sink for one request.
pub struct RequestContext {
    id: Uuid,
    cancel: CancellationToken,
    sink: Arc<dyn LogSink>,
    pub results: RequestResults,
}

impl RequestContext {
    /// A fresh context with its own cancellation token.
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self::with_token(CancellationToken::new(), sink)
    }

    /// A fresh context observing an externally owned token (e.g. wired to Ctrl-C).
    pub fn with_token(cancel: CancellationToken, sink: Arc<dyn LogSink>) -> Self {
        Self {
            id: Uuid::now_v7(),
            cancel,
            sink,
            results: RequestResults::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err(Cancelled)` once the token has been tripped.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(QuarryError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Emit a progress line to the sink and to tracing.
    pub fn log(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        info!(request_id = %self.id, "{line}");
        self.sink.log(line);
    }
}
