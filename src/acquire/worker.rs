//! Chapter workers: fetch + parse with retry, then hand results to the sink.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::report::{AcquireStats, DropLog, DropReason, Progress};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_fetch_error, politeness_delay};
use crate::book::Chapter;
use crate::source::{EmptyResult, FetchError, ParseError, RawPage, Source};

/// Why a single attempt produced no chapter.
#[derive(Debug)]
pub(crate) enum AttemptFailure {
    Fetch(FetchError),
    Parse(ParseError),
    /// Parsed to nothing on a source whose empties are retried.
    Empty,
    /// Terminal policy skip; never retried.
    Skip(DropReason),
}

impl AttemptFailure {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Fetch(error) => classify_fetch_error(error),
            Self::Parse(_) | Self::Empty => FailureType::Transient,
            Self::Skip(_) => FailureType::Permanent,
        }
    }

    fn into_drop_reason(self, attempts: u32) -> DropReason {
        match self {
            Self::Fetch(error) if classify_fetch_error(&error) == FailureType::NeedsAuth => {
                DropReason::AccessRestricted
            }
            Self::Fetch(error) => DropReason::FetchFailed {
                attempts,
                message: error.to_string(),
            },
            Self::Parse(error) => DropReason::ParseFailed {
                attempts,
                message: error.to_string(),
            },
            Self::Empty => DropReason::EmptyResult { attempts },
            Self::Skip(reason) => reason,
        }
    }

    /// Maps an empty parse result through the source policy.
    pub(crate) fn empty(policy: EmptyResult) -> Self {
        match policy {
            EmptyResult::Retry => Self::Empty,
            EmptyResult::AccessRestricted => Self::Skip(DropReason::AccessRestricted),
            EmptyResult::KnownEmpty => Self::Skip(DropReason::KnownEmpty),
        }
    }
}

/// How a retried operation ended without a value.
#[derive(Debug)]
pub(crate) enum Halt {
    Dropped(DropReason),
    Cancelled,
}

/// Sleeps for `delay` unless `cancel` fires first. Returns false on cancel.
pub(crate) async fn sleep_unless_cancelled(cancel: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

/// Shared retry loop: runs `attempt` until it succeeds, hits a terminal
/// failure, exhausts the policy, or cancellation interrupts a backoff.
///
/// A politeness pause follows every attempt. The attempt in flight is never
/// interrupted.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    request_interval: Duration,
    cancel: &CancellationToken,
    stats: Option<&AcquireStats>,
    mut attempt: F,
) -> Result<T, Halt>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptFailure>>,
{
    let mut attempt_number = 0u32;
    loop {
        attempt_number += 1;
        if let Some(stats) = stats {
            stats.increment_fetch_attempts();
        }

        let outcome = attempt().await;
        sleep_unless_cancelled(cancel, politeness_delay(request_interval)).await;

        let failure = match outcome {
            Ok(value) => return Ok(value),
            Err(failure) => failure,
        };

        match policy.should_retry(failure.failure_type(), attempt_number) {
            RetryDecision::Retry { delay, attempt: next_attempt } => {
                info!(
                    attempt = next_attempt,
                    max_attempts = policy.max_attempts(),
                    delay_ms = delay.as_millis(),
                    failure = ?failure,
                    "retrying"
                );
                if let Some(stats) = stats {
                    stats.increment_retried();
                }
                if !sleep_unless_cancelled(cancel, delay).await {
                    debug!(attempt = attempt_number, "retry abandoned on cancellation");
                    return Err(Halt::Cancelled);
                }
            }
            RetryDecision::DoNotRetry { reason } => {
                debug!(%reason, "not retrying");
                return Err(Halt::Dropped(failure.into_drop_reason(attempt_number)));
            }
        }
    }
}

/// State shared by all chapter workers of one run.
pub(crate) struct WorkerContext {
    pub(crate) book_id: String,
    pub(crate) source: Source,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) request_interval: Duration,
    pub(crate) stats: Arc<AcquireStats>,
    pub(crate) progress: Arc<Progress>,
    pub(crate) drops: Arc<DropLog>,
    pub(crate) cancel: CancellationToken,
}

/// Parses on the blocking pool so heavy parsers do not stall other fetches.
async fn parse_chapter_off_thread(
    source: &Source,
    pages: Vec<RawPage>,
    chapter_id: &str,
) -> Result<Option<Chapter>, ParseError> {
    let parser = Arc::clone(&source.parser);
    let id = chapter_id.to_string();
    tokio::task::spawn_blocking(move || parser.parse_chapter(&pages, &id))
        .await
        .unwrap_or_else(|join_error| {
            Err(ParseError::new(
                format!("chapter {chapter_id}"),
                format!("parser task failed: {join_error}"),
            ))
        })
}

async fn attempt_chapter(ctx: &WorkerContext, chapter_id: &str) -> Result<Chapter, AttemptFailure> {
    let pages = ctx
        .source
        .fetcher
        .get_book_chapter(&ctx.book_id, chapter_id)
        .await
        .map_err(AttemptFailure::Fetch)?;

    match parse_chapter_off_thread(&ctx.source, pages, chapter_id).await {
        Ok(Some(chapter)) => Ok(chapter),
        Ok(None) => Err(AttemptFailure::empty(ctx.source.policy.on_empty)),
        Err(error) => Err(AttemptFailure::Parse(error)),
    }
}

/// Worker loop: take ids until the queue closes or cancellation is observed.
///
/// On cancellation the chapter in hand is finished; ids still queued are left
/// for a later run.
#[instrument(skip(ctx, work_rx, save_tx))]
pub(crate) async fn run_worker(
    worker: usize,
    ctx: Arc<WorkerContext>,
    work_rx: Arc<Mutex<mpsc::Receiver<String>>>,
    save_tx: mpsc::Sender<Chapter>,
) {
    loop {
        let next = {
            let mut rx = work_rx.lock().await;
            tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => None,
                id = rx.recv() => id,
            }
        };
        let Some(chapter_id) = next else {
            break;
        };

        let result = with_retry(
            &ctx.retry_policy,
            ctx.request_interval,
            &ctx.cancel,
            Some(&ctx.stats),
            || attempt_chapter(&ctx, &chapter_id),
        )
        .await;

        match result {
            Ok(chapter) => {
                debug!(chapter_id = %chapter_id, "chapter acquired");
                if save_tx.send(chapter).await.is_err() {
                    warn!(chapter_id = %chapter_id, "storage sink closed; worker stopping");
                    break;
                }
            }
            Err(Halt::Dropped(reason)) => {
                warn!(
                    chapter_id = %chapter_id,
                    kind = reason.kind(),
                    %reason,
                    "chapter dropped"
                );
                ctx.drops.push(chapter_id, reason);
                ctx.progress.advance(1);
            }
            Err(Halt::Cancelled) => {
                debug!(chapter_id = %chapter_id, "chapter abandoned on cancellation");
            }
        }
    }
    debug!("worker finished");
}
