//! SearXNG backend (JSON API).
//!
//! Requires an instance with `json` listed under `search.formats`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use quarry_shared::{DocumentSummary, QuarryError, Result};

use super::{SearchBackend, normalize_path, prefix_matches};

const WEB_PATH: &str = "/searxng";
const NEWS_PATH: &str = "/searxng/news";

#[derive(Debug, Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearxngResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearxngResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    published_date: Option<String>,
}

/// Metasearch through a self-hosted SearXNG instance.
pub struct SearxngBackend {
    client: Client,
    base_url: String,
}

impl SearxngBackend {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: crate::build_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SearchBackend for SearxngBackend {
    fn name(&self) -> &str {
        "searxng"
    }

    fn paths(&self) -> Vec<String> {
        vec![WEB_PATH.to_string(), NEWS_PATH.to_string()]
    }

    #[instrument(skip(self), fields(backend = "searxng"))]
    async fn search(&self, query: &str, path: &str) -> Result<Vec<DocumentSummary>> {
        let mut params = vec![("q", query), ("format", "json")];
        if prefix_matches(NEWS_PATH, &normalize_path(path)) {
            params.push(("categories", "news"));
        }

        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&params)
            .send()
            .await
            .map_err(|e| QuarryError::Search(format!("searxng request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuarryError::Search(format!("searxng: HTTP {status}")));
        }

        let body: SearxngResponse = response
            .json()
            .await
            .map_err(|e| QuarryError::Search(format!("searxng: invalid JSON: {e}")))?;

        debug!(results = body.results.len(), "searxng responded");

        Ok(body
            .results
            .into_iter()
            .map(|r| {
                let summary =
                    DocumentSummary::new(r.title, r.url, r.content.unwrap_or_default());
                match r.published_date {
                    Some(date) if !date.is_empty() => summary.with_date(date),
                    _ => summary,
                }
            })
            .collect())
    }
}
