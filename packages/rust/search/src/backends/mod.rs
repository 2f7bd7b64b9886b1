//! Search backend capability trait and the routing-path registry.
//!
//! Each backend owns one or more routing paths (e.g. `/brave`, `/brave/news`).
//! The registry resolves a request path to the backend owning the longest
//! registered prefix, so `/brave/news/tech` goes to whichever backend registered
//! `/brave/news` before falling back to `/brave`.

mod brave;
mod searxng;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use quarry_shared::{DocumentSummary, QuarryError, Result, SearchSettings};

pub use brave::BraveBackend;
pub use searxng::SearxngBackend;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Capability interface every search backend implements.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Human-readable backend name for tracing.
    fn name(&self) -> &str;

    /// Routing paths this backend answers.
    fn paths(&self) -> Vec<String>;

    /// Run one query against the backend.
    async fn search(&self, query: &str, path: &str) -> Result<Vec<DocumentSummary>>;

    /// Reorder `docs` by relevance to `query`.
    ///
    /// Implementations must return the input unchanged when they cannot rerank.
    async fn rerank(&self, docs: Vec<DocumentSummary>, _query: &str) -> Vec<DocumentSummary> {
        docs
    }

    /// Adapt a planned query to the backend's query syntax.
    async fn rewrite_query(&self, query: &str) -> String {
        query.to_string()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Statically registered backends keyed by routing path.
#[derive(Default, Clone)]
pub struct BackendRegistry {
    routes: BTreeMap<String, Arc<dyn SearchBackend>>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in backends that are usable with the given settings.
    ///
    /// SearXNG is always registered; Brave only when its token env var is set.
    pub fn with_defaults(settings: &SearchSettings) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(SearxngBackend::new(
            &settings.searxng_url,
            settings.timeout_secs,
        )?))?;

        match std::env::var(&settings.brave_api_key_env) {
            Ok(token) if !token.is_empty() => {
                registry.register(Arc::new(BraveBackend::new(token, settings.timeout_secs)?))?;
            }
            _ => debug!(env = %settings.brave_api_key_env, "brave token not set, backend disabled"),
        }

        Ok(registry)
    }

    /// Register every path a backend declares. Paths are unique across backends.
    pub fn register(&mut self, backend: Arc<dyn SearchBackend>) -> Result<()> {
        for path in backend.paths() {
            let key = normalize_path(&path);
            if let Some(existing) = self.routes.get(&key) {
                return Err(QuarryError::validation(format!(
                    "routing path {key} already registered by {}",
                    existing.name()
                )));
            }
            info!(path = %key, backend = backend.name(), "registered search backend");
            self.routes.insert(key, backend.clone());
        }
        Ok(())
    }

    /// Resolve a routing path to the backend with the longest matching prefix.
    pub fn resolve(&self, path: &str) -> Option<Arc<dyn SearchBackend>> {
        let path = normalize_path(path);
        self.routes
            .iter()
            .filter(|(prefix, _)| prefix_matches(prefix, &path))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, backend)| backend.clone())
    }

    /// Every registered routing path, sorted.
    pub fn all_paths(&self) -> Vec<String> {
        self.routes.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Canonical routing path: leading slash, no trailing slash (except for the root path).
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// `prefix` matches `path` on a segment boundary. Both must be normalized.
pub fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}
