//! bookfetch core library
//!
//! Downloads serialized books chapter by chapter, stores them per book in
//! SQLite-backed generations, and runs them through a chain of processing
//! stages with incremental reuse.
//!
//! # Architecture
//!
//! - [`db`] - SQLite connection setup (WAL, busy timeout)
//! - [`book`] - Chapter, BookInfo and plan types
//! - [`store`] - Per-generation chapter store and on-disk book layout
//! - [`source`] - Fetcher/parser seams and the HTTP + JSON implementations
//! - [`acquire`] - Concurrent fetch → parse → store pipeline
//! - [`stage`] - Stage engine, processors and the provenance manifest
//! - [`hooks`] - Progress callbacks

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod acquire;
pub mod book;
pub mod db;
pub mod hooks;
pub mod source;
pub mod stage;
pub mod store;

// Re-export commonly used types
pub use acquire::{
    AcquireError, AcquireOptions, AcquireReport, AcquisitionPipeline, BookDownloadReport,
    DropReason, RetryPolicy, RunStatus,
};
pub use book::{BookInfo, Chapter, ChapterDescriptor, ChapterRecord, Plan, PlanFilter, Volume};
pub use db::{Database, DbOptions};
pub use hooks::{NoopHooks, PipelineHooks};
pub use source::{
    EmptyResult, FetchError, Fetcher, HttpFetcher, HttpFetcherConfig, JsonParser, ParseError,
    Parser, Source, SourcePolicy,
};
pub use stage::{
    PipelineMeta, Processor, ProcessorError, ProcessorRegistry, StageConfig, StageEngine,
    StageEngineOptions, StageError, StageReport, StageRunReport,
};
pub use store::{BookLayout, ChapterStore, Generation, StorageError};
