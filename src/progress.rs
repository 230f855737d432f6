//! Progress bar rendering of pipeline hooks.

use std::path::Path;
use std::sync::Mutex;
use std::sync::PoisonError;

use bookfetch_core::PipelineHooks;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

/// Forwards pipeline hooks to one `indicatif` bar. Hidden when quiet.
pub(crate) struct BarHooks {
    bar: ProgressBar,
    label: Mutex<String>,
}

impl BarHooks {
    pub(crate) fn new(book_id: &str, hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        bar.set_style(
            ProgressStyle::with_template("{prefix} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_prefix(book_id.to_string());
        Self {
            bar,
            label: Mutex::new(String::from("download")),
        }
    }

    fn update(&self, done: usize, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(done as u64);
        let label = self.label.lock().unwrap_or_else(PoisonError::into_inner);
        self.bar.set_message(label.clone());
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineHooks for BarHooks {
    fn on_progress(&self, done: usize, total: usize) {
        self.update(done, total);
    }

    fn on_stage_start(&self, stage: &str) {
        *self.label.lock().unwrap_or_else(PoisonError::into_inner) = stage.to_string();
        self.bar.reset();
    }

    fn on_stage_progress(&self, _stage: &str, done: usize, total: usize) {
        self.update(done, total);
    }

    fn on_stage_complete(&self, stage: &str) {
        self.bar.set_message(format!("{stage} done"));
    }

    fn on_missing(&self, what: &str, path: &Path) {
        self.bar.suspend(|| warn!(what, path = %path.display(), "required input is missing"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_bar_tracks_progress() {
        let hooks = BarHooks::new("42", true);
        hooks.on_progress(3, 10);
        assert_eq!(hooks.bar.position(), 3);
        assert_eq!(hooks.bar.length(), Some(10));

        hooks.on_stage_start("cleaner");
        hooks.on_stage_progress("cleaner", 1, 4);
        assert_eq!(hooks.bar.position(), 1);
        assert_eq!(hooks.bar.message(), "cleaner");
        hooks.finish();
    }
}
