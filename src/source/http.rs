//! Generic HTTP fetcher driven by URL templates.
//!
//! Templates may contain `{book_id}` and `{chapter_id}` placeholders; values
//! are percent-encoded before substitution. When a JSON page carries a
//! non-empty `next_page` string, it is followed (relative URLs resolved
//! against the current page) so multi-page chapters arrive as one page list.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use super::{FetchError, Fetcher, RawPage};

/// Default connect timeout in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default whole-request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Upper bound on `next_page` hops for one chapter.
const MAX_PAGES: usize = 64;

fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("bookfetch/{version}")
}

fn default_connect_timeout_secs() -> u64 {
    CONNECT_TIMEOUT_SECS
}

fn default_request_timeout_secs() -> u64 {
    REQUEST_TIMEOUT_SECS
}

/// Endpoint templates and client settings for [`HttpFetcher`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpFetcherConfig {
    /// e.g. `https://host/api/book/{book_id}`
    pub book_info_url: String,
    /// e.g. `https://host/api/book/{book_id}/chapter/{chapter_id}`
    pub chapter_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl HttpFetcherConfig {
    pub fn new(book_info_url: impl Into<String>, chapter_url: impl Into<String>) -> Self {
        Self {
            book_info_url: book_info_url.into(),
            chapter_url: chapter_url.into(),
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            user_agent: None,
        }
    }
}

/// [`Fetcher`] over plain HTTP GET requests.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: HttpFetcherConfig,
}

impl HttpFetcher {
    /// Builds the HTTP client for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Unavailable`] if the client cannot be built.
    pub fn new(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .cookie_store(true)
            .user_agent(config.user_agent.clone().unwrap_or_else(default_user_agent))
            .build()
            .map_err(|e| FetchError::unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &HttpFetcherConfig {
        &self.config
    }

    async fn fetch_page(&self, url: &Url) -> Result<RawPage, FetchError> {
        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url.as_str())
            } else {
                FetchError::network(url.as_str(), e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url.as_str(), status.as_u16()));
        }

        response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::timeout(url.as_str())
            } else {
                FetchError::network(url.as_str(), e)
            }
        })
    }

    async fn fetch_pages(&self, first: Url) -> Result<Vec<RawPage>, FetchError> {
        let mut pages = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next.take() {
            let page = self.fetch_page(&url).await?;
            if pages.len() + 1 < MAX_PAGES
                && let Some(link) = next_page_link(&page)
            {
                next = Some(
                    url.join(&link)
                        .map_err(|_| FetchError::invalid_url(link.clone()))?,
                );
                debug!(page = pages.len() + 1, next = %link, "following next page");
            }
            pages.push(page);
        }
        Ok(pages)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn get_book_info(&self, book_id: &str) -> Result<Vec<RawPage>, FetchError> {
        let url = expand_template(&self.config.book_info_url, book_id, None)?;
        Ok(vec![self.fetch_page(&url).await?])
    }

    #[instrument(skip(self))]
    async fn get_book_chapter(
        &self,
        book_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<RawPage>, FetchError> {
        let url = expand_template(&self.config.chapter_url, book_id, Some(chapter_id))?;
        self.fetch_pages(url).await
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Substitutes `{book_id}`/`{chapter_id}` and validates the result.
fn expand_template(template: &str, book_id: &str, chapter_id: Option<&str>) -> Result<Url, FetchError> {
    let mut expanded = template.replace("{book_id}", &encode(book_id));
    if let Some(chapter_id) = chapter_id {
        expanded = expanded.replace("{chapter_id}", &encode(chapter_id));
    }
    Url::parse(&expanded).map_err(|_| FetchError::invalid_url(expanded))
}

fn next_page_link(page: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(page).ok()?;
    value
        .get("next_page")
        .and_then(serde_json::Value::as_str)
        .filter(|link| !link.trim().is_empty())
        .map(str::to_string)
}
