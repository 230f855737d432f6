//! Run statistics and the final acquisition report.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::hooks::PipelineHooks;

/// Why a chapter produced no stored record in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The source withholds the chapter (HTTP 401/403, or an empty result
    /// from a source classified as access restricted). Never retried.
    AccessRestricted,
    /// Empty result from a source that legitimately has empty chapters.
    KnownEmpty,
    /// Every attempt parsed to nothing.
    EmptyResult { attempts: u32 },
    /// The last attempt failed to fetch.
    FetchFailed { attempts: u32, message: String },
    /// The last attempt failed to parse.
    ParseFailed { attempts: u32, message: String },
    /// The batch holding the chapter could not be written.
    StorageFailed { message: String },
}

impl DropReason {
    /// Policy skips that are an expected outcome rather than a failure.
    #[must_use]
    pub fn is_policy_skip(&self) -> bool {
        matches!(self, Self::AccessRestricted | Self::KnownEmpty)
    }

    /// Short taxonomy label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AccessRestricted => "access_restricted",
            Self::KnownEmpty => "known_empty",
            Self::EmptyResult { .. } => "empty_result",
            Self::FetchFailed { .. } => "fetch_error",
            Self::ParseFailed { .. } => "parse_error",
            Self::StorageFailed { .. } => "storage_error",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessRestricted => write!(f, "access restricted"),
            Self::KnownEmpty => write!(f, "known empty"),
            Self::EmptyResult { attempts } => write!(f, "empty after {attempts} attempts"),
            Self::FetchFailed { attempts, message } => {
                write!(f, "fetch failed after {attempts} attempts: {message}")
            }
            Self::ParseFailed { attempts, message } => {
                write!(f, "parse failed after {attempts} attempts: {message}")
            }
            Self::StorageFailed { message } => write!(f, "storage failed: {message}"),
        }
    }
}

/// A chapter left out of this run and the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedChapter {
    pub id: String,
    pub reason: DropReason,
}

/// Which sink batch a flush wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Clean,
    Dirty,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Dirty => write!(f, "dirty"),
        }
    }
}

/// One `upsert_many` call issued by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushRecord {
    pub batch: BatchKind,
    pub size: usize,
    pub succeeded: bool,
}

/// Terminal status of an acquisition run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
    PartiallyFailed { reason: String },
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::PartiallyFailed { reason } => write!(f, "partially failed: {reason}"),
        }
    }
}

/// Summary of one acquisition run.
///
/// `done` counts chapters that reached a final state this run: stored,
/// already present (skipped), or dropped by a non-storage reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireReport {
    pub total: usize,
    pub done: usize,
    /// Chapters written this run (clean and dirty).
    pub stored: usize,
    /// Subset of `stored` written with `need_refetch = true`.
    pub stored_dirty: usize,
    pub skipped_existing: usize,
    /// Fetch attempts issued, including retries.
    pub fetch_attempts: usize,
    pub retried: usize,
    pub dropped: Vec<DroppedChapter>,
    pub flushes: Vec<FlushRecord>,
    pub status: RunStatus,
}

impl AcquireReport {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Counters shared between producer, workers and sink.
#[derive(Debug, Default)]
pub(crate) struct AcquireStats {
    stored: AtomicUsize,
    stored_dirty: AtomicUsize,
    skipped_existing: AtomicUsize,
    fetch_attempts: AtomicUsize,
    retried: AtomicUsize,
}

impl AcquireStats {
    pub(crate) fn stored(&self) -> usize {
        self.stored.load(Ordering::SeqCst)
    }

    pub(crate) fn stored_dirty(&self) -> usize {
        self.stored_dirty.load(Ordering::SeqCst)
    }

    pub(crate) fn skipped_existing(&self) -> usize {
        self.skipped_existing.load(Ordering::SeqCst)
    }

    pub(crate) fn fetch_attempts(&self) -> usize {
        self.fetch_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    pub(crate) fn add_stored(&self, count: usize, dirty: bool) {
        self.stored.fetch_add(count, Ordering::SeqCst);
        if dirty {
            self.stored_dirty.fetch_add(count, Ordering::SeqCst);
        }
    }

    pub(crate) fn increment_skipped_existing(&self) {
        self.skipped_existing.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_fetch_attempts(&self) {
        self.fetch_attempts.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}

/// Monotonic `(done, total)` counter that forwards every advance to the hooks.
pub(crate) struct Progress {
    done: Mutex<usize>,
    total: usize,
    hooks: Arc<dyn PipelineHooks>,
}

impl Progress {
    pub(crate) fn new(total: usize, hooks: Arc<dyn PipelineHooks>) -> Self {
        Self {
            done: Mutex::new(0),
            total,
            hooks,
        }
    }

    pub(crate) fn advance(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done += count;
        self.hooks.on_progress(*done, self.total);
    }

    pub(crate) fn done(&self) -> usize {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Collected drops, shared by workers and sink.
#[derive(Debug, Default)]
pub(crate) struct DropLog {
    entries: Mutex<Vec<DroppedChapter>>,
}

impl DropLog {
    pub(crate) fn push(&self, id: String, reason: DropReason) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(DroppedChapter { id, reason });
    }

    pub(crate) fn take(&self) -> Vec<DroppedChapter> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
