//! Content sources: the fetch and parse collaborators of the acquisition
//! pipeline.
//!
//! A source is a [`Fetcher`] (network I/O, returns raw pages) paired with a
//! [`Parser`] (pure, turns raw pages into [`BookInfo`]/[`Chapter`]) and a
//! [`SourcePolicy`] describing how its results are classified and stored.
//! Site adapters live outside this crate and plug in through these traits;
//! [`HttpFetcher`] and [`JsonParser`] cover sources that already serve the
//! crate's JSON shapes.

mod http;
mod json;

pub use http::{HttpFetcher, HttpFetcherConfig};
pub use json::JsonParser;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::book::{BookInfo, Chapter};

/// One raw document returned by a fetcher (HTML, JSON, ...).
pub type RawPage = String;

/// Errors raised while fetching raw pages.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level failure (DNS, connection refused, TLS, ...).
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// Non-success HTTP status.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// The URL built for a request is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Transport failure reported by a non-HTTP fetcher; retried like a
    /// network error.
    #[error("fetch failed: {message}")]
    Unavailable { message: String },
}

impl FetchError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// The raw pages could not be decoded into the expected shape.
#[derive(Debug, Clone, Error)]
#[error("failed to parse {what}: {message}")]
pub struct ParseError {
    /// What was being parsed (`book info`, `chapter 42`, ...).
    pub what: String,
    pub message: String,
}

impl ParseError {
    pub fn new(what: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            what: what.into(),
            message: message.to_string(),
        }
    }
}

/// Fetches raw pages for a book and its chapters.
///
/// Both operations return a list of pages so multi-page chapters need no
/// special casing. Implementations may retry or rate-limit internally; the
/// pipeline applies its own retry policy on top.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get_book_info(&self, book_id: &str) -> Result<Vec<RawPage>, FetchError>;

    async fn get_book_chapter(
        &self,
        book_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<RawPage>, FetchError>;
}

/// Turns raw pages into structured records. Pure: no I/O.
///
/// `Ok(None)` means the pages carried no usable content (empty, locked,
/// placeholder); how that is treated depends on [`SourcePolicy::on_empty`].
pub trait Parser: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ParseError`] if the pages are malformed.
    fn parse_book_info(&self, pages: &[RawPage]) -> Result<Option<BookInfo>, ParseError>;

    /// # Errors
    ///
    /// Returns [`ParseError`] if the pages are malformed.
    fn parse_chapter(
        &self,
        pages: &[RawPage],
        chapter_id: &str,
    ) -> Result<Option<Chapter>, ParseError>;
}

/// How a source's empty parse results are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyResult {
    /// Empty results are treated as a transient glitch and retried.
    #[default]
    Retry,
    /// The source withholds content it does not grant access to; skip.
    AccessRestricted,
    /// The source legitimately has empty chapters; skip.
    KnownEmpty,
}

/// Where a class of results is written in a multi-source store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTarget {
    pub source_id: i64,
    /// Lower is preferred on reads.
    pub priority: i64,
}

impl BatchTarget {
    #[must_use]
    pub fn new(source_id: i64, priority: i64) -> Self {
        Self {
            source_id,
            priority,
        }
    }
}

/// Decides whether a parsed chapter is stored as needing refetch.
pub type DirtyPredicate = Arc<dyn Fn(&Chapter) -> bool + Send + Sync>;

/// Per-source classification and storage rules.
#[derive(Clone, Default)]
pub struct SourcePolicy {
    pub on_empty: EmptyResult,
    /// Target of chapters that are directly usable.
    pub clean: BatchTarget,
    /// Target of chapters flagged by [`Self::is_dirty`].
    pub dirty: BatchTarget,
    is_dirty: Option<DirtyPredicate>,
}

impl SourcePolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_empty(mut self, on_empty: EmptyResult) -> Self {
        self.on_empty = on_empty;
        self
    }

    /// Splits results into a clean and a dirty batch, each written to its own
    /// target.
    #[must_use]
    pub fn with_dirty_predicate<F>(mut self, clean: BatchTarget, dirty: BatchTarget, predicate: F) -> Self
    where
        F: Fn(&Chapter) -> bool + Send + Sync + 'static,
    {
        self.clean = clean;
        self.dirty = dirty;
        self.is_dirty = Some(Arc::new(predicate));
        self
    }

    /// Returns true if `chapter` must be stored with `need_refetch = true`.
    #[must_use]
    pub fn is_dirty(&self, chapter: &Chapter) -> bool {
        self.is_dirty.as_ref().is_some_and(|predicate| predicate(chapter))
    }
}

impl fmt::Debug for SourcePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourcePolicy")
            .field("on_empty", &self.on_empty)
            .field("clean", &self.clean)
            .field("dirty", &self.dirty)
            .field("has_dirty_predicate", &self.is_dirty.is_some())
            .finish()
    }
}

/// A fetcher, a parser and the policy that governs their results.
#[derive(Clone)]
pub struct Source {
    pub fetcher: Arc<dyn Fetcher>,
    pub parser: Arc<dyn Parser>,
    pub policy: SourcePolicy,
}

impl Source {
    pub fn new(fetcher: Arc<dyn Fetcher>, parser: Arc<dyn Parser>) -> Self {
        Self {
            fetcher,
            parser,
            policy: SourcePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SourcePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
