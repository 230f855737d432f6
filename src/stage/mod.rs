//! Stage engine: runs an ordered list of processors over a book, each stage
//! reading one generation and writing the next.
//!
//! # Overview
//!
//! A run starts from the `raw` generation and the raw book info. For every
//! [`StageConfig`] the engine:
//!
//! 1. checks that the input generation exists,
//! 2. transforms and persists the book info,
//! 3. decides whether the previous output can be reused: the stage must not
//!    be forced (`overwrite`), its manifest entry must carry the same config
//!    hash and the same list of upstream stages, and its store must exist,
//! 4. empties an ineligible output, then processes every planned chapter
//!    that is not reusable, routing outputs to clean or dirty batches by the
//!    `need_refetch` flag of the copy read,
//! 5. records provenance in `pipeline.json`.
//!
//! Reuse is id-level: a chapter is reused when the output holds a clean copy
//! and the input copy is clean too. Chapters absent from the input are counted
//! as done without output.
//!
//! A processor or storage error aborts the run. Earlier stages keep their
//! outputs and manifest entries.

mod config;
mod error;
mod manifest;
mod processor;
pub mod processors;

pub use config::{DEFAULT_STAGE_BATCH_SIZE, StageConfig, StageEngineOptions, StageOptions};
pub use error::StageError;
pub use manifest::{PipelineMeta, StageRecord};
pub use processor::{Processor, ProcessorError, ProcessorFactory, ProcessorRegistry, parse_options};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::book::{BookInfo, ChapterRecord, Plan, PlanFilter};
use crate::hooks::{NoopHooks, PipelineHooks};
use crate::store::{BookLayout, ChapterStore, Generation};

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub name: String,
    pub input: Generation,
    /// Planned chapters.
    pub total: usize,
    /// Chapters run through the processor.
    pub processed: usize,
    /// Chapters taken over from the previous output.
    pub reused: usize,
    /// Planned chapters absent from the input generation.
    pub missing_input: usize,
    /// Whether the cached output was eligible for reuse.
    pub cache_eligible: bool,
}

/// Outcome of a full run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRunReport {
    pub stages: Vec<StageReport>,
    /// Generation produced by the last stage (`raw` for an empty list).
    pub final_generation: Generation,
}

/// Mutable state threaded through the stages of one run.
struct RunState {
    prev: Generation,
    completed: Vec<String>,
    book_info: BookInfo,
    plan: Plan,
    meta: PipelineMeta,
}

/// Runs processor chains over one book directory.
pub struct StageEngine {
    layout: BookLayout,
    registry: ProcessorRegistry,
    options: StageEngineOptions,
    hooks: Arc<dyn PipelineHooks>,
}

impl std::fmt::Debug for StageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageEngine")
            .field("layout", &self.layout)
            .field("registry", &self.registry)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl StageEngine {
    pub fn new(layout: BookLayout, registry: ProcessorRegistry) -> Self {
        Self {
            layout,
            registry,
            options: StageEngineOptions::default(),
            hooks: Arc::new(NoopHooks),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: StageEngineOptions) -> Self {
        self.options = StageEngineOptions {
            batch_size: options.batch_size.max(1),
            ..options
        };
        self
    }

    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn PipelineHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Runs `stages` in order over the chapters selected by `filter`.
    ///
    /// Stage names are validated and every processor is built before any
    /// chapter work starts.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] for invalid configuration, missing inputs,
    /// processor failures and storage failures.
    #[instrument(skip(self, stages, filter), fields(dir = %self.layout.dir().display(), stages = stages.len()))]
    pub async fn run(
        &self,
        stages: &[StageConfig],
        filter: &PlanFilter,
    ) -> Result<StageRunReport, StageError> {
        let processors = self.build_processors(stages)?;

        let raw = Generation::raw();
        let first_stage = stages.first().map_or(raw.as_str(), |s| s.name.as_str());
        let book_info = match self.layout.load_book_info(&raw) {
            Ok(Some(info)) => info,
            Ok(None) => {
                let path = self.layout.book_info_path(&raw);
                self.hooks.on_missing("book info", &path);
                return Err(StageError::MissingInput {
                    stage: first_stage.to_string(),
                    what: "book info",
                    path,
                });
            }
            Err(error) => return Err(StageError::storage(first_stage, error)),
        };

        let manifest_path = self.layout.manifest_path();
        let mut meta = PipelineMeta::load(&manifest_path);
        meta.pipeline.clear();
        meta.save(&manifest_path)
            .map_err(|source| StageError::Manifest { source })?;

        let mut state = RunState {
            prev: raw,
            completed: Vec::new(),
            plan: Plan::from_book_info(&book_info, filter),
            book_info,
            meta,
        };
        info!(planned = state.plan.len(), "starting stage run");

        let mut reports = Vec::with_capacity(stages.len());
        for (stage, processor) in stages.iter().zip(processors) {
            let report = self.run_stage(stage, processor.as_ref(), &mut state).await?;
            reports.push(report);
        }

        Ok(StageRunReport {
            stages: reports,
            final_generation: state.prev,
        })
    }

    fn build_processors(&self, stages: &[StageConfig]) -> Result<Vec<Box<dyn Processor>>, StageError> {
        let mut seen = HashSet::new();
        stages
            .iter()
            .map(|stage| {
                let generation = Generation::new(&stage.name).ok_or_else(|| {
                    StageError::config(
                        &stage.name,
                        "stage names may only contain letters, digits, '_' and '-'",
                    )
                })?;
                if generation.is_raw() {
                    return Err(StageError::config(&stage.name, "'raw' is reserved for acquisition output"));
                }
                if !seen.insert(stage.name.as_str()) {
                    return Err(StageError::config(&stage.name, "duplicate stage name"));
                }
                self.registry
                    .create(stage.processor_name(), &stage.options)
                    .map_err(|e| StageError::config(&stage.name, e.to_string()))
            })
            .collect()
    }

    #[instrument(skip(self, stage, processor, state), fields(stage = %stage.name, input = %state.prev))]
    async fn run_stage(
        &self,
        stage: &StageConfig,
        processor: &dyn Processor,
        state: &mut RunState,
    ) -> Result<StageReport, StageError> {
        let name = stage.name.as_str();
        let output_generation = Generation::new(name)
            .ok_or_else(|| StageError::config(name, "invalid stage name"))?;
        self.hooks.on_stage_start(name);

        let input_path = self.layout.chapter_store_path(&state.prev);
        if !input_path.exists() {
            self.hooks.on_missing("chapter store", &input_path);
            return Err(StageError::MissingInput {
                stage: name.to_string(),
                what: "chapter store",
                path: input_path,
            });
        }

        let book_info = processor
            .process_book_info(state.book_info.clone())
            .map_err(|e| StageError::Processor {
                stage: name.to_string(),
                target: "book info".to_string(),
                message: e.to_string(),
            })?;
        self.layout
            .save_book_info(&output_generation, &book_info)
            .map_err(|e| StageError::storage(name, e))?;
        state.book_info = book_info;

        let config_hash = stage.config_hash();
        let output_path = self.layout.chapter_store_path(&output_generation);
        let cache_eligible = !stage.overwrite
            && state.meta.executed.get(name).is_some_and(|record| {
                record.config_hash == config_hash && record.depends_on == state.completed
            })
            && output_path.exists();
        debug!(cache_eligible, overwrite = stage.overwrite, "stage cache check");

        let manifest_path = self.layout.manifest_path();
        if !cache_eligible && state.meta.executed.remove(name).is_some() {
            state
                .meta
                .save(&manifest_path)
                .map_err(|source| StageError::Manifest { source })?;
        }

        let input = ChapterStore::open_with(&input_path, &self.options.db)
            .await
            .map_err(|e| StageError::storage(name, e))?;
        let output = match ChapterStore::open_with(&output_path, &self.options.db).await {
            Ok(output) => output,
            Err(error) => {
                input.close().await;
                return Err(StageError::storage(name, error));
            }
        };

        let result = if cache_eligible || output.is_empty() {
            Ok(())
        } else {
            info!(stale = output.len(), "discarding previous stage output");
            output.clear().await.map_err(|e| StageError::storage(name, e))
        };
        let result = match result {
            Ok(()) => {
                self.transform(stage, processor, state, &input, &output, cache_eligible)
                    .await
            }
            Err(error) => Err(error),
        };
        input.close().await;
        output.close().await;
        let report = result?;

        state.meta.executed.insert(
            name.to_string(),
            StageRecord {
                processed_at: Utc::now(),
                depends_on: state.completed.clone(),
                config_hash,
            },
        );
        state.meta.pipeline.push(name.to_string());
        state
            .meta
            .save(&manifest_path)
            .map_err(|source| StageError::Manifest { source })?;
        state.completed.push(name.to_string());
        state.prev = output_generation;

        self.hooks.on_stage_complete(name);
        info!(
            processed = report.processed,
            reused = report.reused,
            missing_input = report.missing_input,
            total = report.total,
            "stage complete"
        );
        Ok(report)
    }

    async fn transform(
        &self,
        stage: &StageConfig,
        processor: &dyn Processor,
        state: &RunState,
        input: &ChapterStore,
        output: &ChapterStore,
        cache_eligible: bool,
    ) -> Result<StageReport, StageError> {
        let name = stage.name.as_str();
        let plan = &state.plan;
        let total = plan.len();
        let batch_size = self.options.batch_size;

        let mut missing_input = 0;
        let mut reused = 0;
        let mut to_process = Vec::new();
        for id in plan.iter() {
            if !input.exists(id) {
                missing_input += 1;
            } else if cache_eligible
                && output.exists(id)
                && !output.need_refetch(id)
                && !input.need_refetch(id)
            {
                reused += 1;
            } else {
                to_process.push(id);
            }
        }
        if missing_input > 0 {
            warn!(missing_input, "planned chapters absent from input generation");
        }

        let mut done = missing_input + reused;
        self.hooks.on_stage_progress(name, done, total);

        let mut processed = 0;
        let mut clean: Vec<ChapterRecord> = Vec::with_capacity(batch_size);
        let mut dirty: Vec<ChapterRecord> = Vec::new();

        for chunk in to_process.chunks(batch_size) {
            let mut records = input
                .get_many_records(chunk)
                .await
                .map_err(|e| StageError::storage(name, e))?;
            for id in chunk {
                let Some(loaded) = records.remove(*id) else {
                    missing_input += 1;
                    done += 1;
                    continue;
                };
                let transformed =
                    processor
                        .process_chapter(loaded.chapter)
                        .map_err(|e| StageError::Processor {
                            stage: name.to_string(),
                            target: format!("chapter {id}"),
                            message: e.to_string(),
                        })?;
                let (batch, record) = if loaded.need_refetch {
                    (&mut dirty, ChapterRecord::dirty(transformed))
                } else {
                    (&mut clean, ChapterRecord::clean(transformed))
                };
                batch.push(record);
                if batch.len() >= batch_size {
                    let flushed = flush(output, batch, name).await?;
                    processed += flushed;
                    done += flushed;
                    self.hooks.on_stage_progress(name, done, total);
                }
            }
        }
        for batch in [&mut clean, &mut dirty] {
            let flushed = flush(output, batch, name).await?;
            processed += flushed;
            done += flushed;
        }
        self.hooks.on_stage_progress(name, done, total);

        Ok(StageReport {
            name: name.to_string(),
            input: state.prev.clone(),
            total,
            processed,
            reused,
            missing_input,
            cache_eligible,
        })
    }
}

async fn flush(
    output: &ChapterStore,
    batch: &mut Vec<ChapterRecord>,
    stage: &str,
) -> Result<usize, StageError> {
    if batch.is_empty() {
        return Ok(0);
    }
    output
        .upsert_many(batch)
        .await
        .map_err(|e| StageError::storage(stage, e))?;
    let size = batch.len();
    batch.clear();
    debug!(size, "stage batch flushed");
    Ok(size)
}
