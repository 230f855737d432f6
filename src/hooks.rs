//! Progress and UI callbacks.
//!
//! Hooks are fire-and-forget: they are invoked inline from pipeline tasks and
//! must return quickly. Rendering belongs on the implementor's side (the CLI
//! forwards them to an `indicatif` bar).

use std::path::Path;

/// Observer of acquisition and stage progress. Every method defaults to a
/// no-op.
pub trait PipelineHooks: Send + Sync {
    /// Acquisition progress; `done` never decreases within one run.
    fn on_progress(&self, _done: usize, _total: usize) {}

    fn on_stage_start(&self, _stage: &str) {}

    fn on_stage_progress(&self, _stage: &str, _done: usize, _total: usize) {}

    fn on_stage_complete(&self, _stage: &str) {}

    /// A required artifact (`what`) is absent at `path`.
    fn on_missing(&self, _what: &str, _path: &Path) {}
}

/// Hooks that ignore every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl PipelineHooks for NoopHooks {}
