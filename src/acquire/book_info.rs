//! Book-info acquisition with an on-disk cache.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::worker::{AttemptFailure, Halt, with_retry};
use super::{AcquireError, AcquisitionPipeline};
use crate::book::BookInfo;
use crate::source::{ParseError, Source};
use crate::store::Generation;

impl AcquisitionPipeline {
    /// Returns the book's info, using `book_info.raw.json` when it is younger
    /// than `ttl`.
    ///
    /// A stale or missing cache is refreshed from the source with the
    /// pipeline's retry policy and persisted. If the refresh fails and a
    /// cached copy exists, the cached copy is returned.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::BookInfoUnavailable`] when the fetch fails
    /// without a cached copy, and [`AcquireError::Storage`] if the fresh copy
    /// cannot be written.
    #[instrument(skip(self, cancel), fields(book_id = %self.book_id))]
    pub async fn acquire_book_info(
        &self,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<BookInfo, AcquireError> {
        let raw = Generation::raw();
        let path = self.layout.book_info_path(&raw);
        let cached = match self.layout.load_book_info(&raw) {
            Ok(cached) => cached,
            Err(error) => {
                warn!(error = %error, "ignoring unreadable cached book info");
                None
            }
        };

        if let Some(info) = &cached
            && is_fresh(&path, ttl)
        {
            debug!(path = %path.display(), "using fresh cached book info");
            return Ok(info.clone());
        }

        match self.fetch_book_info(cancel).await {
            Ok(info) => {
                self.layout.save_book_info(&raw, &info)?;
                info!(
                    book_name = %info.book_name,
                    chapters = info.chapter_count(),
                    "book info refreshed"
                );
                Ok(info)
            }
            Err(reason) => match cached {
                Some(info) => {
                    warn!(%reason, "book info refresh failed; using cached copy");
                    Ok(info)
                }
                None => Err(AcquireError::BookInfoUnavailable {
                    book_id: self.book_id.clone(),
                    reason,
                }),
            },
        }
    }

    async fn fetch_book_info(&self, cancel: &CancellationToken) -> Result<BookInfo, String> {
        let result = with_retry(
            &self.retry_policy,
            self.options.request_interval,
            cancel,
            None,
            || attempt_book_info(&self.source, &self.book_id),
        )
        .await;
        match result {
            Ok(info) => Ok(info),
            Err(Halt::Dropped(reason)) => Err(reason.to_string()),
            Err(Halt::Cancelled) => Err("cancelled".to_string()),
        }
    }
}

async fn attempt_book_info(source: &Source, book_id: &str) -> Result<BookInfo, AttemptFailure> {
    let pages = source
        .fetcher
        .get_book_info(book_id)
        .await
        .map_err(AttemptFailure::Fetch)?;

    let parser = Arc::clone(&source.parser);
    let parsed = tokio::task::spawn_blocking(move || parser.parse_book_info(&pages))
        .await
        .unwrap_or_else(|join_error| {
            Err(ParseError::new(
                "book info",
                format!("parser task failed: {join_error}"),
            ))
        });

    match parsed {
        Ok(Some(info)) => Ok(info),
        Ok(None) => Err(AttemptFailure::Empty),
        Err(error) => Err(AttemptFailure::Parse(error)),
    }
}

fn is_fresh(path: &Path, ttl: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age < ttl)
}
