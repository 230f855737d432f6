//! Single storage consumer of the acquisition pipeline.
//!
//! The sink owns the only write path into the raw store. It drains the save
//! channel until every worker has dropped its sender, so cancellation can
//! never lose a chapter that was fully fetched.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use super::report::{AcquireStats, BatchKind, DropLog, DropReason, FlushRecord, Progress};
use crate::book::{Chapter, ChapterRecord};
use crate::source::SourcePolicy;
use crate::store::ChapterStore;

/// What the sink did over one run.
#[derive(Debug, Default)]
pub(crate) struct SinkOutcome {
    pub(crate) flushes: Vec<FlushRecord>,
    pub(crate) failed_batches: usize,
}

pub(crate) struct Sink {
    store: Arc<ChapterStore>,
    policy: SourcePolicy,
    batch_size: usize,
    stats: Arc<AcquireStats>,
    progress: Arc<Progress>,
    drops: Arc<DropLog>,
    clean: Vec<ChapterRecord>,
    dirty: Vec<ChapterRecord>,
    outcome: SinkOutcome,
}

impl Sink {
    pub(crate) fn new(
        store: Arc<ChapterStore>,
        policy: SourcePolicy,
        batch_size: usize,
        stats: Arc<AcquireStats>,
        progress: Arc<Progress>,
        drops: Arc<DropLog>,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            policy,
            batch_size,
            stats,
            progress,
            drops,
            clean: Vec::with_capacity(batch_size),
            dirty: Vec::new(),
            outcome: SinkOutcome::default(),
        }
    }

    /// Consumes chapters until the channel closes, then flushes what is left.
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Chapter>) -> SinkOutcome {
        while let Some(chapter) = rx.recv().await {
            self.accept(chapter).await;
        }
        debug!(
            clean_pending = self.clean.len(),
            dirty_pending = self.dirty.len(),
            "save channel closed; final flush"
        );
        self.flush(BatchKind::Clean).await;
        self.flush(BatchKind::Dirty).await;
        self.outcome
    }

    async fn accept(&mut self, chapter: Chapter) {
        let (kind, target) = if self.policy.is_dirty(&chapter) {
            (BatchKind::Dirty, self.policy.dirty)
        } else {
            (BatchKind::Clean, self.policy.clean)
        };
        let record = ChapterRecord {
            chapter,
            source_id: target.source_id,
            priority: target.priority,
            need_refetch: kind == BatchKind::Dirty,
        };

        let limit = self.batch_size;
        let batch = self.batch_mut(kind);
        batch.push(record);
        if batch.len() >= limit {
            self.flush(kind).await;
        }
    }

    fn batch_mut(&mut self, kind: BatchKind) -> &mut Vec<ChapterRecord> {
        match kind {
            BatchKind::Clean => &mut self.clean,
            BatchKind::Dirty => &mut self.dirty,
        }
    }

    async fn flush(&mut self, kind: BatchKind) {
        let batch = std::mem::take(self.batch_mut(kind));
        if batch.is_empty() {
            return;
        }
        let size = batch.len();

        match self.store.upsert_many(&batch).await {
            Ok(()) => {
                debug!(batch = %kind, size, "batch flushed");
                self.stats.add_stored(size, kind == BatchKind::Dirty);
                self.progress.advance(size);
                self.outcome.flushes.push(FlushRecord {
                    batch: kind,
                    size,
                    succeeded: true,
                });
            }
            Err(storage_error) => {
                error!(
                    batch = %kind,
                    size,
                    error = %storage_error,
                    "batch flush failed; chapters in this batch were not stored"
                );
                let message = storage_error.to_string();
                for record in batch {
                    self.drops.push(
                        record.chapter.id,
                        DropReason::StorageFailed {
                            message: message.clone(),
                        },
                    );
                }
                self.outcome.failed_batches += 1;
                self.outcome.flushes.push(FlushRecord {
                    batch: kind,
                    size,
                    succeeded: false,
                });
            }
        }
    }
}
