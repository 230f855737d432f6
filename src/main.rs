//! CLI entry point for bookfetch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bookfetch_core::{
    AcquisitionPipeline, BookLayout, ChapterStore, HttpFetcher, JsonParser, PipelineMeta,
    ProcessorRegistry, RunStatus, Source, StageConfig, StageEngine,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

mod app_config;
mod cli;
mod progress;

use app_config::{FileConfig, load_file_config};
use cli::{Args, Command, DownloadArgs, ProcessArgs, StatusArgs};
use progress::BarHooks;

const DEFAULT_DATA_DIR: &str = "./books";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = match &args.config {
        Some(path) => load_file_config(path)?,
        None => FileConfig::default(),
    };
    let data_dir = args
        .data_dir
        .clone()
        .or_else(|| config.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, finishing in-flight chapters");
                cancel.cancel();
            }
        });
    }

    match &args.command {
        Command::Download(download) => {
            run_download(download, &config, &data_dir, args.quiet, &cancel).await
        }
        Command::Process(process) => run_process(process, &config, &data_dir, args.quiet).await,
        Command::Status(status) => run_status(status, &data_dir).await,
    }
}

async fn run_download(
    download: &DownloadArgs,
    config: &FileConfig,
    data_dir: &Path,
    quiet: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let Some(source_config) = config.source.clone() else {
        bail!("No source configured. Add a `source` section to the run file (--config)");
    };
    let fetcher = HttpFetcher::new(source_config).context("Failed to build HTTP client")?;
    let source = Source::new(Arc::new(fetcher), Arc::new(JsonParser));

    let mut options = config.acquire_options();
    if let Some(workers) = download.workers {
        options.workers = usize::from(workers);
    }
    if let Some(retry_times) = download.retry_times {
        options.retry_times = retry_times;
    }
    if let Some(interval) = download.request_interval {
        options.request_interval = std::time::Duration::from_millis(interval);
    }
    if download.no_skip_existing {
        options.skip_existing = false;
    }
    let filter = config.plan.to_filter();

    let mut failed = 0usize;
    for book_id in &download.book_ids {
        if cancel.is_cancelled() {
            warn!(book_id = %book_id, "skipping book after interrupt");
            failed += 1;
            continue;
        }
        let layout = BookLayout::for_book(data_dir, book_id);
        let hooks = Arc::new(BarHooks::new(book_id, quiet));
        let pipeline = AcquisitionPipeline::open(layout.clone(), book_id, source.clone(), options.clone())
            .await
            .with_context(|| format!("Failed to open book {book_id}"))?
            .with_hooks(hooks.clone());

        let result = pipeline
            .download_book(&filter, config.book_info_ttl(), cancel)
            .await;
        pipeline.close().await;
        hooks.finish();

        let report = match result {
            Ok(report) => report,
            Err(e) => {
                error!(book_id = %book_id, error = %e, "download failed");
                failed += 1;
                continue;
            }
        };
        let chapters = &report.chapters;
        info!(
            book_id = %book_id,
            book_name = %report.book_info.book_name,
            done = chapters.done,
            total = chapters.total,
            stored = chapters.stored,
            skipped = chapters.skipped_existing,
            dropped = chapters.dropped.len(),
            status = %chapters.status,
            "Download finished"
        );
        if chapters.status != RunStatus::Completed {
            failed += 1;
            continue;
        }
        if download.process && !config.stages.is_empty() {
            if let Err(e) = process_book(&layout, config, &config.stages, quiet).await {
                error!(book_id = %book_id, error = %e, "processing failed");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} book(s) did not complete", download.book_ids.len());
    }
    Ok(())
}

async fn run_process(
    process: &ProcessArgs,
    config: &FileConfig,
    data_dir: &Path,
    quiet: bool,
) -> Result<()> {
    if config.stages.is_empty() {
        bail!("No stages configured. Add a `stages` list to the run file (--config)");
    }
    let stages: Vec<StageConfig> = config
        .stages
        .iter()
        .cloned()
        .map(|stage| {
            let force = stage.overwrite || process.overwrite;
            stage.overwrite(force)
        })
        .collect();

    let mut failed = 0usize;
    for book_id in &process.book_ids {
        let layout = BookLayout::for_book(data_dir, book_id);
        if let Err(e) = process_book(&layout, config, &stages, quiet).await {
            error!(book_id = %book_id, error = %e, "processing failed");
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{failed} of {} book(s) failed processing", process.book_ids.len());
    }
    Ok(())
}

async fn process_book(
    layout: &BookLayout,
    config: &FileConfig,
    stages: &[StageConfig],
    quiet: bool,
) -> Result<()> {
    let label = layout.dir().display().to_string();
    let hooks = Arc::new(BarHooks::new(&label, quiet));
    let engine = StageEngine::new(layout.clone(), ProcessorRegistry::builtin())
        .with_options(config.stage_engine_options())
        .with_hooks(hooks.clone());
    let result = engine.run(stages, &config.plan.to_filter()).await;
    hooks.finish();
    let report = result?;
    for stage in &report.stages {
        info!(
            stage = %stage.name,
            input = %stage.input,
            processed = stage.processed,
            reused = stage.reused,
            missing_input = stage.missing_input,
            total = stage.total,
            "Stage finished"
        );
    }
    info!(dir = %label, generation = %report.final_generation, "Processing finished");
    Ok(())
}

async fn run_status(status: &StatusArgs, data_dir: &Path) -> Result<()> {
    for book_id in &status.book_ids {
        let layout = BookLayout::for_book(data_dir, book_id);
        println!("{book_id} ({})", layout.dir().display());
        let generations = layout.stored_generations()?;
        if generations.is_empty() {
            println!("  no stored generations");
            continue;
        }
        for generation in &generations {
            let store = ChapterStore::open(&layout.chapter_store_path(generation))
                .await
                .with_context(|| format!("Failed to open generation {generation} of {book_id}"))?;
            println!(
                "  {generation}: {} chapters ({} clean, {} need refetch)",
                store.len(),
                store.clean_ids().len(),
                store.dirty_ids().len()
            );
            store.close().await;
        }

        let meta = PipelineMeta::load(&layout.manifest_path());
        if !meta.pipeline.is_empty() {
            println!("  pipeline: {}", meta.pipeline.join(" -> "));
        }
        for (name, record) in &meta.executed {
            println!(
                "  stage {name}: processed {} after [{}] hash {}",
                record.processed_at.to_rfc3339(),
                record.depends_on.join(", "),
                record.config_hash.chars().take(12).collect::<String>()
            );
        }
        println!("  latest: {}", meta.latest_generation());
    }
    Ok(())
}
