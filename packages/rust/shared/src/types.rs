//! Core domain types flowing through the answering pipeline.

use serde::{Deserialize, Serialize};

/// Default character budget for any single payload sent to or rendered for the LLM.
pub const DEFAULT_BUDGET: usize = 28_720;

// ---------------------------------------------------------------------------
// PlannedQuery
// ---------------------------------------------------------------------------

/// One search sub-query produced by the planner, with a human-readable note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedQuery {
    /// Query text sent to the search backend.
    pub query: String,
    /// Planning note shown to the user.
    pub log: String,
}

// ---------------------------------------------------------------------------
// DocumentSummary
// ---------------------------------------------------------------------------

/// A search hit as returned by a backend.
///
/// `id` is assigned by the retriever and is unique within one request;
/// backends leave it at zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    pub id: usize,
    pub title: String,
    pub url: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub is_ad: bool,
}

impl DocumentSummary {
    /// Build an unassigned, non-ad summary.
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            title: title.into(),
            url: url.into(),
            description: description.into(),
            date: None,
            is_ad: false,
        }
    }

    /// Attach a publication date.
    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }

    /// Mark this hit as a sponsored result.
    pub fn as_ad(mut self) -> Self {
        self.is_ad = true;
        self
    }

    /// Text the aggregator matches page sections against.
    pub fn match_reference(&self) -> &str {
        if self.description.trim().is_empty() {
            &self.title
        } else {
            &self.description
        }
    }
}

// ---------------------------------------------------------------------------
// AggregatedDocument
// ---------------------------------------------------------------------------

/// A summary plus the page excerpt that best matches it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedDocument {
    #[serde(flatten)]
    pub summary: DocumentSummary,
    /// Best-matching section of the fetched page; empty when the fetch failed.
    pub content: String,
    /// URL the page was actually served from (after redirects).
    pub real_url: String,
    /// 1-based position at the aggregator boundary.
    pub paragraph_order: usize,
}

// ---------------------------------------------------------------------------
// Facts
// ---------------------------------------------------------------------------

/// A single claim extracted from one or more documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub fact: String,
    pub urls: Vec<String>,
}

/// The compacted union of all extracted facts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinedFactSet {
    pub fact: String,
    pub urls: Vec<String>,
}

impl RefinedFactSet {
    pub fn is_empty(&self) -> bool {
        self.fact.trim().is_empty()
    }
}
