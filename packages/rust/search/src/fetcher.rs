//! Page content fetching for the aggregator.
//!
//! A fetch never fails from the caller's point of view: any transport, status,
//! size, or conversion problem yields an empty page so positional bookkeeping
//! downstream stays stable.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use tracing::{debug, instrument, warn};
use url::Url;

use quarry_shared::{FetchSettings, QuarryError, Result};

/// Text content of one fetched page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedPage {
    /// Markdown/plain-text rendering; empty when the fetch failed.
    pub text: String,
    /// URL the content was served from after redirects.
    pub final_url: String,
    /// The page's own title, for HTML pages that declare one.
    pub title: Option<String>,
}

impl FetchedPage {
    /// The failed-fetch value for `url`.
    pub fn empty(url: &str) -> Self {
        Self {
            text: String::new(),
            final_url: url.to_string(),
            title: None,
        }
    }
}

/// Collaborator that turns a URL into readable text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchedPage;
}

// ---------------------------------------------------------------------------
// HttpPageFetcher
// ---------------------------------------------------------------------------

/// reqwest-backed fetcher rendering HTML to Markdown.
pub struct HttpPageFetcher {
    client: Client,
    allow_private_hosts: bool,
    max_body_bytes: usize,
}

impl HttpPageFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(crate::USER_AGENT)
            .redirect(redirect_policy(settings.allow_private_hosts))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| QuarryError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_private_hosts: settings.allow_private_hosts,
            max_body_bytes: settings.max_body_bytes,
        })
    }

    async fn try_fetch(&self, raw_url: &str) -> Result<FetchedPage> {
        let url = Url::parse(raw_url)
            .map_err(|e| QuarryError::validation(format!("invalid URL {raw_url}: {e}")))?;

        if !self.allow_private_hosts && is_ssrf_target(&url) {
            return Err(QuarryError::validation(format!(
                "{url}: private or non-HTTP target blocked"
            )));
        }

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| QuarryError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QuarryError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len as usize > self.max_body_bytes {
                return Err(QuarryError::Network(format!(
                    "{url}: body of {len} bytes exceeds limit"
                )));
            }
        }

        let final_url = response.url().to_string();
        let is_html_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));

        let body = response
            .text()
            .await
            .map_err(|e| QuarryError::Network(format!("{url}: body read failed: {e}")))?;

        if body.len() > self.max_body_bytes {
            return Err(QuarryError::Network(format!(
                "{url}: body of {} bytes exceeds limit",
                body.len()
            )));
        }

        let (text, title) = if is_html_type || quarry_markdown::looks_like_html(&body) {
            let page = quarry_markdown::render(&body)?;
            (page.markdown, page.title)
        } else {
            (body.trim().to_string(), None)
        };

        debug!(%final_url, len = text.len(), "page fetched");
        Ok(FetchedPage {
            text,
            final_url,
            title,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> FetchedPage {
        match self.try_fetch(url).await {
            Ok(page) => page,
            Err(e) => {
                warn!(url, error = %e, "page fetch failed");
                FetchedPage::empty(url)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

const MAX_REDIRECTS: usize = 5;

/// Redirect policy re-applying the SSRF guard to every hop.
fn redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        match check_redirect(attempt.url(), attempt.previous().len(), allow_private_hosts) {
            Ok(()) => attempt.follow(),
            Err(reason) => attempt.error(reason),
        }
    })
}

/// `hops` counts the URLs already visited, the original request included.
fn check_redirect(
    next: &Url,
    hops: usize,
    allow_private_hosts: bool,
) -> std::result::Result<(), String> {
    if hops > MAX_REDIRECTS {
        return Err(format!("too many redirects ({hops})"));
    }
    if !allow_private_hosts && is_ssrf_target(next) {
        return Err(format!("redirect to {next} blocked"));
    }
    Ok(())
}

/// Non-HTTP schemes, loopback/private IPs, and local hostnames.
fn is_ssrf_target(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return true;
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24 (IETF protocol assignments)
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn local_fetcher() -> HttpPageFetcher {
        HttpPageFetcher::new(&FetchSettings {
            allow_private_hosts: true,
            ..FetchSettings::default()
        })
        .unwrap()
    }

    #[test]
    fn ssrf_blocks_private_and_local_targets() {
        for raw in [
            "file:///etc/passwd",
            "http://192.168.1.1/admin",
            "http://10.0.0.1/",
            "http://127.0.0.1:8080/",
            "http://localhost:3000/api",
            "http://[::1]/",
            "http://printer.local/",
            "http://192.0.0.8/",
        ] {
            let url = Url::parse(raw).unwrap();
            assert!(is_ssrf_target(&url), "{raw} should be blocked");
        }
    }

    #[test]
    fn ssrf_allows_public_hosts() {
        let url = Url::parse("https://news.example.com/story").unwrap();
        assert!(!is_ssrf_target(&url));
    }

    #[test]
    fn redirect_hops_are_guarded() {
        let public = Url::parse("https://news.example.com/next").unwrap();
        let loopback = Url::parse("http://127.0.0.1/admin").unwrap();
        let metadata = Url::parse("http://169.254.169.254/latest").unwrap();

        assert!(check_redirect(&public, 1, false).is_ok());
        assert!(check_redirect(&loopback, 1, false).is_err());
        assert!(check_redirect(&metadata, 2, false).is_err());
        assert!(check_redirect(&loopback, 1, true).is_ok());
        assert!(check_redirect(&public, MAX_REDIRECTS + 1, false).is_err());
    }

    #[tokio::test]
    async fn html_pages_are_rendered_to_markdown() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/article"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string(
                        "<html><body><nav>menu</nav><main><h1>Pie</h1><p>Bake it.</p></main></body></html>",
                    ),
            )
            .mount(&server)
            .await;

        let url = format!("{}/article", server.uri());
        let page = local_fetcher().fetch(&url).await;

        assert!(page.text.contains("# Pie"));
        assert!(page.text.contains("Bake it."));
        assert!(!page.text.contains("menu"));
        assert_eq!(page.final_url, url);
        assert_eq!(page.title.as_deref(), Some("Pie"));
    }

    #[tokio::test]
    async fn plain_text_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .set_body_string("  line one\n\nline two  "),
            )
            .mount(&server)
            .await;

        let page = local_fetcher().fetch(&server.uri()).await;
        assert_eq!(page.text, "line one\n\nline two");
        assert!(page.title.is_none());
    }

    #[tokio::test]
    async fn redirects_report_the_final_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "/landing"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/landing"))
            .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
            .mount(&server)
            .await;

        let page = local_fetcher().fetch(&format!("{}/r", server.uri())).await;
        assert_eq!(page.text, "landed");
        assert_eq!(page.final_url, format!("{}/landing", server.uri()));
    }

    #[tokio::test]
    async fn failures_yield_empty_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/missing", server.uri());
        let page = local_fetcher().fetch(&url).await;
        assert_eq!(page, FetchedPage::empty(&url));
    }

    #[tokio::test]
    async fn private_hosts_blocked_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
            .expect(0)
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(&FetchSettings::default()).unwrap();
        let page = fetcher.fetch(&server.uri()).await;
        assert!(page.text.is_empty());
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
            .mount(&server)
            .await;

        let fetcher = HttpPageFetcher::new(&FetchSettings {
            allow_private_hosts: true,
            max_body_bytes: 16,
            ..FetchSettings::default()
        })
        .unwrap();
        assert!(fetcher.fetch(&server.uri()).await.text.is_empty());
    }
}
