//! Search backends and page fetching.
//!
//! This crate provides:
//! - [`backends`]: The [`SearchBackend`] capability trait, built-in SearXNG and
//!   Brave backends, and the [`BackendRegistry`] routing-path resolver
//! - [`fetcher`]: The [`PageFetcher`] collaborator and its HTTP implementation

pub mod backends;
pub mod fetcher;

use std::time::Duration;

use reqwest::Client;

use quarry_shared::{QuarryError, Result};

pub use backends::{
    BackendRegistry, BraveBackend, SearchBackend, SearxngBackend, normalize_path, prefix_matches,
};
pub use fetcher::{FetchedPage, HttpPageFetcher, PageFetcher};

/// User-Agent sent with every outbound request.
pub(crate) const USER_AGENT: &str = concat!("Quarry/", env!("CARGO_PKG_VERSION"));

/// Shared client setup for the search backends.
pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| QuarryError::Network(format!("failed to build HTTP client: {e}")))
}
