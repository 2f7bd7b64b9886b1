//! In-crate fakes for stage and pipeline tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use quarry_search::{FetchedPage, PageFetcher, SearchBackend};
use quarry_shared::{AggregatedDocument, DocumentSummary, QuarryError, Result};

use crate::context::{CollectingSink, RequestContext};
use crate::llm::{ChatMessage, LlmClient};

/// A context plus the sink it logs to.
pub fn context() -> (RequestContext, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::new());
    (RequestContext::new(sink.clone()), sink)
}

pub fn summary(title: &str, url: &str, description: &str) -> DocumentSummary {
    DocumentSummary::new(title, url, description)
}

pub fn aggregated(url: &str, content: &str, order: usize) -> AggregatedDocument {
    AggregatedDocument {
        summary: summary("Title", url, "description"),
        content: content.to_string(),
        real_url: url.to_string(),
        paragraph_order: order,
    }
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

type Responder = dyn Fn(usize, &[ChatMessage]) -> Result<Vec<String>> + Send + Sync;

/// LLM whose replies come from a closure; counts every call.
pub struct ScriptedLlm {
    calls: AtomicUsize,
    respond: Box<Responder>,
}

impl ScriptedLlm {
    pub fn new(
        respond: impl Fn(usize, &[ChatMessage]) -> Result<Vec<String>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            respond: Box::new(respond),
        }
    }

    /// Always replies with `text`.
    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(vec![text.clone()]))
    }

    /// Always fails with a transport-style error.
    pub fn failing() -> Self {
        Self::new(|_, _| Err(QuarryError::Llm("model unavailable".into())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Vec<String>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(n, messages)
    }
}

/// LLM that holds every call open briefly and records how many calls were
/// in flight when each one started.
pub struct PacedLlm {
    reply: String,
    in_flight: AtomicUsize,
    starts: Mutex<Vec<usize>>,
}

impl PacedLlm {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            in_flight: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        }
    }

    /// In-flight count seen by each call as it started, in start order.
    pub fn starts(&self) -> Vec<usize> {
        self.starts.lock().unwrap().clone()
    }

    pub fn peak(&self) -> usize {
        self.starts().into_iter().max().unwrap_or(0)
    }

    /// Sizes of the groups of calls that overlapped.
    pub fn groups(&self) -> Vec<usize> {
        let mut groups: Vec<usize> = Vec::new();
        for seen in self.starts() {
            match groups.last_mut() {
                Some(last) if seen > 1 => *last += 1,
                _ => groups.push(1),
            }
        }
        groups
    }
}

#[async_trait]
impl LlmClient for PacedLlm {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<Vec<String>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.starts.lock().unwrap().push(now);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![self.reply.clone()])
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Backend answering from a fixed query → results table; unknown queries fail.
pub struct StaticBackend {
    paths: Vec<String>,
    results: HashMap<String, Vec<DocumentSummary>>,
    calls: AtomicUsize,
    searched_paths: Mutex<Vec<String>>,
    cancel_after_first: Option<CancellationToken>,
    reverse_on_rerank: bool,
}

impl StaticBackend {
    pub fn new(path: &str) -> Self {
        Self {
            paths: vec![path.to_string()],
            results: HashMap::new(),
            calls: AtomicUsize::new(0),
            searched_paths: Mutex::new(Vec::new()),
            cancel_after_first: None,
            reverse_on_rerank: false,
        }
    }

    pub fn with_results(mut self, query: &str, docs: Vec<DocumentSummary>) -> Self {
        self.results.insert(query.to_string(), docs);
        self
    }

    /// Trip `token` as soon as the first search returns.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_after_first = Some(token);
        self
    }

    pub fn reversing(mut self) -> Self {
        self.reverse_on_rerank = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The `path` argument of every search so far.
    pub fn searched_paths(&self) -> Vec<String> {
        self.searched_paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchBackend for StaticBackend {
    fn name(&self) -> &str {
        "static"
    }

    fn paths(&self) -> Vec<String> {
        self.paths.clone()
    }

    async fn search(&self, query: &str, path: &str) -> Result<Vec<DocumentSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.searched_paths.lock().unwrap().push(path.to_string());
        if let Some(token) = &self.cancel_after_first {
            token.cancel();
        }
        self.results
            .get(query)
            .cloned()
            .ok_or_else(|| QuarryError::Search(format!("no results for {query}")))
    }

    async fn rerank(&self, mut docs: Vec<DocumentSummary>, _query: &str) -> Vec<DocumentSummary> {
        if self.reverse_on_rerank {
            docs.reverse();
        }
        docs
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Fetcher serving pages from a URL → text map; unknown URLs come back empty.
#[derive(Default)]
pub struct MapFetcher {
    pages: HashMap<String, (String, Option<String>)>,
}

impl MapFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), (text.to_string(), None));
        self
    }

    pub fn with_titled_page(mut self, url: &str, title: &str, text: &str) -> Self {
        self.pages
            .insert(url.to_string(), (text.to_string(), Some(title.to_string())));
        self
    }
}

#[async_trait]
impl PageFetcher for MapFetcher {
    async fn fetch(&self, url: &str) -> FetchedPage {
        match self.pages.get(url) {
            Some((text, title)) => FetchedPage {
                text: text.clone(),
                final_url: url.to_string(),
                title: title.clone(),
            },
            None => FetchedPage::empty(url),
        }
    }
}
