//! Integration tests for the acquisition pipeline against a scripted source.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bookfetch_core::acquire::{BatchKind, FlushRecord};
use bookfetch_core::source::BatchTarget;
use bookfetch_core::{
    AcquireError, AcquireOptions, AcquisitionPipeline, BookLayout, DropReason, EmptyResult,
    PipelineHooks, Plan, PlanFilter, RunStatus, SourcePolicy,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

mod support;
use support::fake_source::{FakeFetcher, Reply, book_info, fake_source};

fn fast_options(workers: usize, batch: usize) -> AcquireOptions {
    AcquireOptions {
        workers,
        storage_batch_size: batch,
        backoff_factor: Duration::ZERO,
        request_interval: Duration::ZERO,
        ..AcquireOptions::default()
    }
}

fn plan(count: usize) -> Plan {
    Plan::new((1..=count).map(|i| i.to_string()))
}

fn fetcher_with(count: usize) -> FakeFetcher {
    (1..=count).fold(FakeFetcher::new(), |f, i| f.chapter(&i.to_string()))
}

#[derive(Default)]
struct ProgressLog(Mutex<Vec<(usize, usize)>>);

impl PipelineHooks for ProgressLog {
    fn on_progress(&self, done: usize, total: usize) {
        self.0.lock().unwrap().push((done, total));
    }
}

async fn open(
    temp: &TempDir,
    fetcher: &Arc<FakeFetcher>,
    policy: SourcePolicy,
    options: AcquireOptions,
) -> AcquisitionPipeline {
    AcquisitionPipeline::open(
        BookLayout::new(temp.path()),
        "book-1",
        fake_source(fetcher, policy),
        options,
    )
    .await
    .expect("pipeline should open")
}

#[tokio::test]
async fn test_five_chapters_flush_in_batches_of_two() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(fetcher_with(5));
    let hooks = Arc::new(ProgressLog::default());
    let pipeline = open(&temp, &fetcher, SourcePolicy::new(), fast_options(2, 2))
        .await
        .with_hooks(hooks.clone());

    let report = pipeline.run(&plan(5), &CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!((report.done, report.total), (5, 5));
    assert_eq!(report.stored, 5);
    let sizes: Vec<usize> = report.flushes.iter().map(|f| f.size).collect();
    assert_eq!(sizes, [2, 2, 1]);
    assert!(report.flushes.iter().all(|f| f.succeeded && f.batch == BatchKind::Clean));
    assert_eq!(*hooks.0.lock().unwrap(), [(2, 5), (4, 5), (5, 5)]);

    let stored = pipeline.store().get("3").await.unwrap().unwrap();
    assert_eq!(stored.title, "Chapter 3");
    assert_eq!(stored.content, "content 3");
    pipeline.close().await;
}

#[tokio::test]
async fn test_second_run_fetches_nothing() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(fetcher_with(6));
    let pipeline = open(&temp, &fetcher, SourcePolicy::new(), fast_options(3, 4)).await;
    let first = pipeline.run(&plan(6), &CancellationToken::new()).await.unwrap();
    assert_eq!(first.stored, 6);
    pipeline.close().await;

    let pipeline = open(&temp, &fetcher, SourcePolicy::new(), fast_options(3, 4)).await;
    let calls_before = fetcher.total_calls();
    let second = pipeline.run(&plan(6), &CancellationToken::new()).await.unwrap();

    assert_eq!(fetcher.total_calls(), calls_before);
    assert_eq!(second.fetch_attempts, 0);
    assert_eq!(second.skipped_existing, 6);
    assert_eq!(second.done, 6);
    assert!(second.flushes.is_empty());
    assert!(second.is_complete());
    pipeline.close().await;
}

#[tokio::test]
async fn test_skip_existing_disabled_refetches() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(fetcher_with(2));
    let pipeline = open(&temp, &fetcher, SourcePolicy::new(), fast_options(1, 10)).await;
    pipeline.run(&plan(2), &CancellationToken::new()).await.unwrap();
    pipeline.close().await;

    let options = AcquireOptions {
        skip_existing: false,
        ..fast_options(1, 10)
    };
    let pipeline = open(&temp, &fetcher, SourcePolicy::new(), options).await;
    let report = pipeline.run(&plan(2), &CancellationToken::new()).await.unwrap();
    assert_eq!(report.stored, 2);
    assert_eq!(fetcher.calls("1"), 2);
    pipeline.close().await;
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .script(
                "1",
                vec![Reply::Status(503), Reply::Status(429), Reply::page("One", "body")],
            )
            .script("2", vec![Reply::Empty, Reply::page("Two", "late body")]),
    );
    let pipeline = open(&temp, &fetcher, SourcePolicy::new(), fast_options(2, 5)).await;

    let report = pipeline.run(&plan(2), &CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.stored, 2);
    assert_eq!(fetcher.calls("1"), 3);
    assert_eq!(fetcher.calls("2"), 2);
    assert_eq!(report.retried, 3);
    assert_eq!(report.fetch_attempts, 5);
    pipeline.close().await;
}

#[tokio::test]
async fn test_exhausted_and_permanent_failures_are_dropped() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .chapter("1")
            .script("2", vec![Reply::Status(503)])
            .script("3", vec![Reply::Status(404)]),
    );
    let options = AcquireOptions {
        retry_times: 2,
        ..fast_options(2, 5)
    };
    let pipeline = open(&temp, &fetcher, SourcePolicy::new(), options).await;

    let report = pipeline.run(&plan(3), &CancellationToken::new()).await.unwrap();

    assert!(matches!(report.status, RunStatus::PartiallyFailed { .. }));
    assert_eq!(report.done, 3);
    assert_eq!(report.stored, 1);
    assert_eq!(fetcher.calls("2"), 3);
    assert_eq!(fetcher.calls("3"), 1);

    let mut dropped = report.dropped.clone();
    dropped.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(dropped.len(), 2);
    assert!(matches!(dropped[0].reason, DropReason::FetchFailed { attempts: 3, .. }));
    assert!(matches!(dropped[1].reason, DropReason::FetchFailed { attempts: 1, .. }));
    assert!(!pipeline.store().exists("2"));
    pipeline.close().await;
}

#[tokio::test]
async fn test_access_restricted_chapters_are_skipped_once() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .chapter("1")
            .script("2", vec![Reply::Empty])
            .script("3", vec![Reply::Status(403)]),
    );
    let policy = SourcePolicy::new().on_empty(EmptyResult::AccessRestricted);
    let pipeline = open(&temp, &fetcher, policy, fast_options(2, 5)).await;

    let report = pipeline.run(&plan(3), &CancellationToken::new()).await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.done, 3);
    assert_eq!(fetcher.calls("2"), 1);
    assert_eq!(fetcher.calls("3"), 1);
    assert_eq!(report.dropped.len(), 2);
    assert!(
        report
            .dropped
            .iter()
            .all(|d| d.reason == DropReason::AccessRestricted)
    );
    pipeline.close().await;
}

#[tokio::test]
async fn test_dirty_chapters_use_their_own_batch_and_target() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(
        FakeFetcher::new()
            .chapter("1")
            .script("2", vec![Reply::page("Two", "preview only [partial]")])
            .chapter("3"),
    );
    let policy = SourcePolicy::new().with_dirty_predicate(
        BatchTarget::new(0, 0),
        BatchTarget::new(1, 10),
        |chapter| chapter.content.contains("[partial]"),
    );
    let pipeline = open(&temp, &fetcher, policy.clone(), fast_options(1, 10)).await;

    let report = pipeline.run(&plan(3), &CancellationToken::new()).await.unwrap();

    assert_eq!(report.stored, 3);
    assert_eq!(report.stored_dirty, 1);
    assert!(report.flushes.contains(&FlushRecord {
        batch: BatchKind::Dirty,
        size: 1,
        succeeded: true,
    }));
    let store = pipeline.store();
    assert!(store.need_refetch("2"));
    assert!(!store.need_refetch("1"));
    let record = store.get_record("2").await.unwrap().unwrap();
    assert_eq!((record.source_id, record.priority), (1, 10));
    pipeline.close().await;

    // Only the dirty chapter is fetched again.
    let calls_before = fetcher.calls("1");
    let pipeline = open(&temp, &fetcher, policy, fast_options(1, 10)).await;
    let report = pipeline.run(&plan(3), &CancellationToken::new()).await.unwrap();
    assert_eq!(report.skipped_existing, 2);
    assert_eq!(fetcher.calls("1"), calls_before);
    assert_eq!(fetcher.calls("2"), 2);
    pipeline.close().await;
}

#[tokio::test]
async fn test_cancellation_keeps_done_equal_to_stored_rows() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(fetcher_with(40).with_delay(Duration::from_millis(20)));
    let pipeline = open(&temp, &fetcher, SourcePolicy::new(), fast_options(2, 3)).await;
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });
    }

    let report = pipeline.run(&plan(40), &cancel).await.unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(report.done < report.total);
    assert_eq!(report.done, pipeline.store().len());
    assert_eq!(report.done, report.stored);
    pipeline.close().await;

    // A rerun picks up where the cancelled run stopped.
    let pipeline = open(&temp, &fetcher, SourcePolicy::new(), fast_options(4, 10)).await;
    let report = pipeline.run(&plan(40), &CancellationToken::new()).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(pipeline.store().len(), 40);
    pipeline.close().await;
}

#[tokio::test]
async fn test_download_book_filters_plan_and_caches_book_info() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(fetcher_with(6).with_book_info(&book_info("Sample", 6)));
    let filter = PlanFilter {
        start_id: Some("2".to_string()),
        end_id: Some("4".to_string()),
        ..PlanFilter::default()
    };
    let pipeline = open(&temp, &fetcher, SourcePolicy::new(), fast_options(2, 10)).await;

    let report = pipeline
        .download_book(&filter, Duration::from_secs(3600), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.book_info.book_name, "Sample");
    assert_eq!(report.plan.ids(), ["2", "3", "4"]);
    assert_eq!(report.chapters.stored, 3);
    assert!(!pipeline.store().exists("1"));
    assert!(temp.path().join("book_info.raw.json").exists());

    pipeline
        .download_book(&filter, Duration::from_secs(3600), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(fetcher.book_info_calls(), 1);
    pipeline.close().await;
}

#[tokio::test]
async fn test_book_info_falls_back_to_stale_cache() {
    let temp = TempDir::new().unwrap();
    let online = Arc::new(fetcher_with(2).with_book_info(&book_info("Cached", 2)));
    let pipeline = open(&temp, &online, SourcePolicy::new(), fast_options(1, 10)).await;
    pipeline
        .acquire_book_info(Duration::ZERO, &CancellationToken::new())
        .await
        .unwrap();
    pipeline.close().await;

    let offline = Arc::new(FakeFetcher::new());
    let pipeline = open(&temp, &offline, SourcePolicy::new(), fast_options(1, 10)).await;
    let info = pipeline
        .acquire_book_info(Duration::ZERO, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(info.book_name, "Cached");
    assert_eq!(offline.book_info_calls(), 1);
    pipeline.close().await;
}

#[tokio::test]
async fn test_book_info_unavailable_without_cache() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(FakeFetcher::new());
    let pipeline = open(&temp, &fetcher, SourcePolicy::new(), fast_options(1, 10)).await;

    let result = pipeline
        .download_book(&PlanFilter::default(), Duration::ZERO, &CancellationToken::new())
        .await;

    assert!(matches!(
        result,
        Err(AcquireError::BookInfoUnavailable { ref book_id, .. }) if book_id == "book-1"
    ));
    pipeline.close().await;
}

#[tokio::test]
async fn test_invalid_options_are_rejected_before_opening() {
    let temp = TempDir::new().unwrap();
    let fetcher = Arc::new(FakeFetcher::new());
    for options in [
        AcquireOptions {
            workers: 0,
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
    ] {
        let result = AcquisitionPipeline::open(
            BookLayout::new(temp.path()),
            "book-1",
            fake_source(&fetcher, SourcePolicy::new()),
            options,
        )
        .await;
        assert!(matches!(result, Err(AcquireError::InvalidOption { .. })));
    }
}
