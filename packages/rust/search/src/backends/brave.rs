//! Brave Search API backend (web and news endpoints).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use quarry_shared::{DocumentSummary, QuarryError, Result, text};

use super::{SearchBackend, normalize_path, prefix_matches};

const BRAVE_BASE_URL: &str = "https://api.search.brave.com";
const MAX_QUERY_LENGTH: usize = 400;
const RESULT_COUNT: &str = "20";

const WEB_PATH: &str = "/brave";
const NEWS_PATH: &str = "/brave/news";

#[derive(Debug, Default, Deserialize)]
struct WebResponse {
    #[serde(default)]
    web: Option<ResultList>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultList {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    page_age: Option<String>,
    #[serde(default)]
    age: Option<String>,
}

impl From<BraveResult> for DocumentSummary {
    fn from(r: BraveResult) -> Self {
        let summary = DocumentSummary::new(r.title, r.url, r.description);
        match r.page_age.or(r.age) {
            Some(date) => summary.with_date(date),
            None => summary,
        }
    }
}

/// Brave Search with a subscription token.
pub struct BraveBackend {
    client: Client,
    base_url: String,
    token: String,
}

impl BraveBackend {
    pub fn new(token: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: crate::build_client(timeout_secs)?,
            base_url: BRAVE_BASE_URL.to_string(),
            token: token.into(),
        })
    }

    /// Point the backend at a different API host.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl SearchBackend for BraveBackend {
    fn name(&self) -> &str {
        "brave"
    }

    fn paths(&self) -> Vec<String> {
        vec![WEB_PATH.to_string(), NEWS_PATH.to_string()]
    }

    #[instrument(skip(self), fields(backend = "brave"))]
    async fn search(&self, query: &str, path: &str) -> Result<Vec<DocumentSummary>> {
        let news = prefix_matches(NEWS_PATH, &normalize_path(path));
        let endpoint = if news {
            "/res/v1/news/search"
        } else {
            "/res/v1/web/search"
        };

        let response = self
            .client
            .get(format!("{}{endpoint}", self.base_url))
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.token)
            .query(&[("q", query), ("count", RESULT_COUNT)])
            .send()
            .await
            .map_err(|e| QuarryError::Search(format!("brave request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuarryError::Search(format!("brave: HTTP {status}")));
        }

        let results = if news {
            response
                .json::<ResultList>()
                .await
                .map_err(|e| QuarryError::Search(format!("brave: invalid JSON: {e}")))?
                .results
        } else {
            response
                .json::<WebResponse>()
                .await
                .map_err(|e| QuarryError::Search(format!("brave: invalid JSON: {e}")))?
                .web
                .unwrap_or_default()
                .results
        };

        debug!(results = results.len(), news, "brave responded");

        Ok(results.into_iter().map(DocumentSummary::from).collect())
    }

    async fn rewrite_query(&self, query: &str) -> String {
        text::truncate_chars(query.trim(), MAX_QUERY_LENGTH).to_string()
    }
}
