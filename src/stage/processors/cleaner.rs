use regex::Regex;
use serde::Deserialize;

use crate::book::{BookInfo, Chapter};
use crate::stage::StageOptions;
use crate::stage::processor::{Processor, ProcessorError, parse_options};

fn enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CleanerOptions {
    /// Regexes whose matches are removed from chapter content.
    #[serde(default)]
    remove_patterns: Vec<String>,
    /// Regexes whose matches are removed from chapter and volume titles.
    #[serde(default)]
    title_remove_patterns: Vec<String>,
    /// Strip leading/trailing whitespace (full-width included) on each line.
    #[serde(default = "enabled")]
    trim_lines: bool,
    /// Collapse runs of blank lines into one.
    #[serde(default = "enabled")]
    collapse_blank_lines: bool,
}

/// Removes boilerplate and normalizes whitespace.
///
/// Options: `remove_patterns`, `title_remove_patterns` (regex lists),
/// `trim_lines` and `collapse_blank_lines` (booleans, default true).
#[derive(Debug)]
pub struct Cleaner {
    content_patterns: Vec<Regex>,
    title_patterns: Vec<Regex>,
    trim_lines: bool,
    collapse_blank_lines: bool,
}

impl Cleaner {
    /// # Errors
    ///
    /// Returns [`ProcessorError::InvalidOptions`] for unknown keys or invalid
    /// regexes.
    pub fn from_options(options: &StageOptions) -> Result<Self, ProcessorError> {
        let options: CleanerOptions = parse_options(options)?;
        Ok(Self {
            content_patterns: compile_all(&options.remove_patterns)?,
            title_patterns: compile_all(&options.title_remove_patterns)?,
            trim_lines: options.trim_lines,
            collapse_blank_lines: options.collapse_blank_lines,
        })
    }

    fn clean_title(&self, title: &str) -> String {
        strip_all(&self.title_patterns, title).trim().to_string()
    }

    fn clean_content(&self, content: &str) -> String {
        let stripped = strip_all(&self.content_patterns, content);
        let mut lines: Vec<&str> = Vec::new();
        let mut previous_blank = false;
        for line in stripped.lines() {
            let line = if self.trim_lines { line.trim() } else { line };
            let blank = line.trim().is_empty();
            if blank && previous_blank && self.collapse_blank_lines {
                continue;
            }
            previous_blank = blank;
            lines.push(line);
        }
        lines.join("\n").trim_matches('\n').to_string()
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<Regex>, ProcessorError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern)
                .map_err(|e| ProcessorError::InvalidOptions(format!("pattern '{pattern}': {e}")))
        })
        .collect()
}

fn strip_all(patterns: &[Regex], text: &str) -> String {
    patterns
        .iter()
        .fold(text.to_string(), |acc, pattern| pattern.replace_all(&acc, "").into_owned())
}

impl Processor for Cleaner {
    fn process_book_info(&self, mut info: BookInfo) -> Result<BookInfo, ProcessorError> {
        info.summary = self.clean_content(&info.summary);
        for volume in &mut info.volumes {
            volume.volume_name = self.clean_title(&volume.volume_name);
            for descriptor in &mut volume.chapters {
                descriptor.title = self.clean_title(&descriptor.title);
            }
        }
        Ok(info)
    }

    fn process_chapter(&self, mut chapter: Chapter) -> Result<Chapter, ProcessorError> {
        chapter.title = self.clean_title(&chapter.title);
        chapter.content = self.clean_content(&chapter.content);
        Ok(chapter)
    }
}
