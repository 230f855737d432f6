//! Acquisition pipeline: turns a chapter-id [`Plan`] into raw-generation
//! store writes.
//!
//! # Overview
//!
//! Three roles are connected by two bounded channels:
//!
//! - **Producer** walks the plan in order. Chapters already stored clean are
//!   counted as done immediately when `skip_existing` is set; everything else
//!   is queued for the workers.
//! - **Workers** (`workers` concurrent tasks) fetch and parse one chapter at a
//!   time with retry ([`RetryPolicy`]) and a politeness pause after every
//!   attempt, then hand the chapter to the sink.
//! - **Sink** (one task) batches chapters into clean/dirty batches and writes
//!   each full batch with [`ChapterStore::upsert_many`].
//!
//! A slow sink stalls the workers, which stall the producer. Cancellation is
//! cooperative: the producer stops queueing, workers finish the chapter in
//! hand and exit, and the sink drains and flushes before the run returns.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bookfetch_core::{
//!     AcquireOptions, AcquisitionPipeline, BookLayout, HttpFetcher, HttpFetcherConfig,
//!     JsonParser, PlanFilter, Source,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = HttpFetcher::new(HttpFetcherConfig::new(
//!     "https://example.com/api/book/{book_id}",
//!     "https://example.com/api/book/{book_id}/chapter/{chapter_id}",
//! ))?;
//! let source = Source::new(Arc::new(fetcher), Arc::new(JsonParser));
//! let layout = BookLayout::new("./books/42");
//! let pipeline = AcquisitionPipeline::open(layout, "42", source, AcquireOptions::default()).await?;
//! let report = pipeline
//!     .download_book(&PlanFilter::default(), std::time::Duration::ZERO, &CancellationToken::new())
//!     .await?;
//! println!("{}/{} chapters, {}", report.chapters.done, report.chapters.total, report.chapters.status);
//! pipeline.close().await;
//! # Ok(())
//! # }
//! ```

mod book_info;
mod report;
pub mod retry;
mod sink;
mod worker;

pub use report::{
    AcquireReport, BatchKind, DropReason, DroppedChapter, FlushRecord, RunStatus,
};
pub use retry::{
    FailureType, RetryDecision, RetryPolicy, classify_fetch_error, classify_http_status,
};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::book::{BookInfo, Chapter, Plan, PlanFilter};
use crate::hooks::{NoopHooks, PipelineHooks};
use crate::source::Source;
use crate::store::{BookLayout, ChapterStore, Generation, StorageError};
use report::{AcquireStats, DropLog, Progress};
use sink::Sink;
use worker::{WorkerContext, run_worker};

/// Minimum allowed worker count.
const MIN_WORKERS: usize = 1;

/// Maximum allowed worker count.
const MAX_WORKERS: usize = 64;

/// Maximum allowed retries per chapter.
const MAX_RETRY_TIMES: u32 = 10;

/// Work queue depth per worker.
const WORK_QUEUE_FACTOR: usize = 5;

/// Save queue depth per worker.
const SAVE_QUEUE_FACTOR: usize = 5;

/// Default worker count.
pub const DEFAULT_WORKERS: usize = 4;

/// Default chapters per storage batch.
pub const DEFAULT_STORAGE_BATCH_SIZE: usize = 10;

/// Error type for pipeline-level failures. Per-chapter failures are reported
/// in [`AcquireReport::dropped`] instead.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// An option is outside its valid range.
    #[error("invalid {field} value {value}: expected {expected}")]
    InvalidOption {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    /// Opening the raw store or persisting book info failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Book info could not be fetched and no cached copy exists.
    #[error("book info for '{book_id}' unavailable: {reason}")]
    BookInfoUnavailable { book_id: String, reason: String },

    /// The storage sink task panicked.
    #[error("storage sink task failed: {0}")]
    SinkFailed(String),
}

/// Tuning for one acquisition run.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireOptions {
    /// Concurrent chapter workers (1-64).
    pub workers: usize,
    /// Chapters per `upsert_many` call (>= 1).
    pub storage_batch_size: usize,
    /// Retries after the first attempt (0-10).
    pub retry_times: u32,
    /// Base delay of the exponential backoff.
    pub backoff_factor: Duration,
    /// Politeness pause after every request, jittered up to +10%.
    pub request_interval: Duration,
    /// Skip chapters already stored without `need_refetch`.
    pub skip_existing: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            storage_batch_size: DEFAULT_STORAGE_BATCH_SIZE,
            retry_times: retry::DEFAULT_RETRY_TIMES,
            backoff_factor: Duration::from_secs(2),
            request_interval: Duration::from_millis(500),
            skip_existing: true,
        }
    }
}

impl AcquireOptions {
    /// # Errors
    ///
    /// Returns [`AcquireError::InvalidOption`] for the first out-of-range field.
    pub fn validate(&self) -> Result<(), AcquireError> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.workers) {
            return Err(AcquireError::InvalidOption {
                field: "workers",
                value: self.workers.to_string(),
                expected: "1..=64",
            });
        }
        if self.storage_batch_size == 0 {
            return Err(AcquireError::InvalidOption {
                field: "storage_batch_size",
                value: "0".to_string(),
                expected: "at least 1",
            });
        }
        if self.retry_times > MAX_RETRY_TIMES {
            return Err(AcquireError::InvalidOption {
                field: "retry_times",
                value: self.retry_times.to_string(),
                expected: "0..=10",
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_retry_times(self.retry_times, self.backoff_factor)
    }
}

/// Book info, derived plan and chapter run of [`AcquisitionPipeline::download_book`].
#[derive(Debug, Clone)]
pub struct BookDownloadReport {
    pub book_info: BookInfo,
    pub plan: Plan,
    pub chapters: AcquireReport,
}

/// Acquires one book's chapters into its `raw` generation.
pub struct AcquisitionPipeline {
    book_id: String,
    layout: BookLayout,
    source: Source,
    store: Arc<ChapterStore>,
    options: AcquireOptions,
    retry_policy: RetryPolicy,
    hooks: Arc<dyn PipelineHooks>,
}

impl std::fmt::Debug for AcquisitionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionPipeline")
            .field("book_id", &self.book_id)
            .field("layout", &self.layout)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl AcquisitionPipeline {
    /// Validates `options` and opens the book's raw chapter store.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::InvalidOption`] for bad options and
    /// [`AcquireError::Storage`] if the store cannot be opened.
    #[instrument(skip(layout, source, options), fields(dir = %layout.dir().display()))]
    pub async fn open(
        layout: BookLayout,
        book_id: &str,
        source: Source,
        options: AcquireOptions,
    ) -> Result<Self, AcquireError> {
        options.validate()?;
        layout.ensure_dir()?;
        let store = ChapterStore::open(&layout.chapter_store_path(&Generation::raw())).await?;

        debug!(
            workers = options.workers,
            storage_batch_size = options.storage_batch_size,
            max_attempts = options.retry_times + 1,
            stored = store.len(),
            "acquisition pipeline ready"
        );

        Ok(Self {
            book_id: book_id.to_string(),
            layout,
            source,
            store: Arc::new(store),
            retry_policy: options.retry_policy(),
            options,
            hooks: Arc::new(NoopHooks),
        })
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn PipelineHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replaces the policy derived from the options.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    #[must_use]
    pub fn store(&self) -> &ChapterStore {
        &self.store
    }

    #[must_use]
    pub fn layout(&self) -> &BookLayout {
        &self.layout
    }

    #[must_use]
    pub fn options(&self) -> &AcquireOptions {
        &self.options
    }

    /// Fetches and stores every chapter of `plan`.
    ///
    /// Never fails because of a single chapter: those outcomes are listed in
    /// [`AcquireReport::dropped`].
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::SinkFailed`] if the storage task panicked.
    #[instrument(skip(self, plan, cancel), fields(book_id = %self.book_id, total = plan.len()))]
    pub async fn run(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<AcquireReport, AcquireError> {
        let total = plan.len();
        let workers = self.options.workers;
        let stats = Arc::new(AcquireStats::default());
        let progress = Arc::new(Progress::new(total, Arc::clone(&self.hooks)));
        let drops = Arc::new(DropLog::default());

        info!(
            workers,
            storage_batch_size = self.options.storage_batch_size,
            skip_existing = self.options.skip_existing,
            "starting acquisition"
        );

        let (work_tx, work_rx) = mpsc::channel::<String>(workers * WORK_QUEUE_FACTOR);
        let (save_tx, save_rx) = mpsc::channel::<Chapter>(workers * SAVE_QUEUE_FACTOR);

        let sink = Sink::new(
            Arc::clone(&self.store),
            self.source.policy.clone(),
            self.options.storage_batch_size,
            Arc::clone(&stats),
            Arc::clone(&progress),
            Arc::clone(&drops),
        );
        let sink_handle = tokio::spawn(sink.run(save_rx));

        let context = Arc::new(WorkerContext {
            book_id: self.book_id.clone(),
            source: self.source.clone(),
            retry_policy: self.retry_policy.clone(),
            request_interval: self.options.request_interval,
            stats: Arc::clone(&stats),
            progress: Arc::clone(&progress),
            drops: Arc::clone(&drops),
            cancel: cancel.clone(),
        });
        let work_rx = Arc::new(Mutex::new(work_rx));
        let worker_handles: Vec<_> = (0..workers)
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    Arc::clone(&context),
                    Arc::clone(&work_rx),
                    save_tx.clone(),
                ))
            })
            .collect();
        drop(save_tx);
        drop(work_rx);

        self.produce(plan, work_tx, &stats, &progress, cancel).await;

        for handle in worker_handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "acquisition worker panicked");
            }
        }
        let outcome = sink_handle
            .await
            .map_err(|e| AcquireError::SinkFailed(e.to_string()))?;

        let done = progress.done();
        let dropped = drops.take();
        let failed = dropped.iter().filter(|d| !d.reason.is_policy_skip()).count();
        let status = if outcome.failed_batches > 0 {
            RunStatus::PartiallyFailed {
                reason: format!(
                    "{} of {} batch writes failed",
                    outcome.failed_batches,
                    outcome.flushes.len()
                ),
            }
        } else if cancel.is_cancelled() && done < total {
            RunStatus::Cancelled
        } else if failed > 0 {
            RunStatus::PartiallyFailed {
                reason: format!("{failed} chapters failed"),
            }
        } else {
            RunStatus::Completed
        };

        let report = AcquireReport {
            total,
            done,
            stored: stats.stored(),
            stored_dirty: stats.stored_dirty(),
            skipped_existing: stats.skipped_existing(),
            fetch_attempts: stats.fetch_attempts(),
            retried: stats.retried(),
            dropped,
            flushes: outcome.flushes,
            status,
        };

        info!(
            done = report.done,
            total = report.total,
            stored = report.stored,
            skipped = report.skipped_existing,
            dropped = report.dropped.len(),
            retried = report.retried,
            status = %report.status,
            "acquisition finished"
        );
        Ok(report)
    }

    async fn produce(
        &self,
        plan: &Plan,
        work_tx: mpsc::Sender<String>,
        stats: &AcquireStats,
        progress: &Progress,
        cancel: &CancellationToken,
    ) {
        for chapter_id in plan.iter() {
            if cancel.is_cancelled() {
                debug!("producer observed cancellation");
                break;
            }
            if self.options.skip_existing && !self.store.need_refetch(chapter_id) {
                stats.increment_skipped_existing();
                progress.advance(1);
                continue;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("producer observed cancellation");
                    break;
                }
                sent = work_tx.send(chapter_id.to_string()) => {
                    if sent.is_err() {
                        warn!("all workers exited; producer stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Acquires book info, derives the plan with `filter` and runs it.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError`] if book info is unavailable or the run fails.
    #[instrument(skip(self, filter, cancel), fields(book_id = %self.book_id))]
    pub async fn download_book(
        &self,
        filter: &PlanFilter,
        book_info_ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<BookDownloadReport, AcquireError> {
        let book_info = self.acquire_book_info(book_info_ttl, cancel).await?;
        let plan = Plan::from_book_info(&book_info, filter);
        info!(
            book_name = %book_info.book_name,
            listed = book_info.chapter_count(),
            planned = plan.len(),
            "plan derived from book info"
        );
        let chapters = self.run(&plan, cancel).await?;
        Ok(BookDownloadReport {
            book_info,
            plan,
            chapters,
        })
    }

    /// Releases the raw store. Safe to call more than once.
    pub async fn close(&self) {
        self.store.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        let options = AcquireOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.retry_policy().max_attempts(), 4);
    }

    #[test]
    fn test_options_reject_out_of_range_values() {
        let cases = [
            AcquireOptions {
                workers: 0,
                ..AcquireOptions::default()
            },
            AcquireOptions {
                workers: 65,
                ..AcquireOptions::default()
            },
            AcquireOptions {
                storage_batch_size: 0,
                ..AcquireOptions::default()
            },
            AcquireOptions {
                retry_times: 11,
                ..AcquireOptions::default()
            },
        ];
        for options in cases {
            assert!(matches!(
                options.validate(),
                Err(AcquireError::InvalidOption { .. })
            ));
        }
    }

    #[test]
    fn test_invalid_option_display() {
        let error = AcquireOptions {
            workers: 0,
            ..AcquireOptions::default()
        }
        .validate()
        .unwrap_err();
        let message = error.to_string();
        assert!(message.contains("workers"));
        assert!(message.contains("1..=64"));
    }
}
