use serde::Deserialize;

use crate::book::{BookInfo, Chapter};
use crate::stage::StageOptions;
use crate::stage::processor::{Processor, ProcessorError, parse_options};

/// A literal find/replace pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplaceRule {
    pub find: String,
    #[serde(default)]
    pub replace: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReplaceOptions {
    /// Applied to chapter content.
    #[serde(default)]
    content: Vec<ReplaceRule>,
    /// Applied to chapter titles, volume names and table-of-contents titles.
    #[serde(default)]
    title: Vec<ReplaceRule>,
    /// Applied to book name, author, summary and tags.
    #[serde(default)]
    metadata: Vec<ReplaceRule>,
}

/// Literal find/replace tables, applied in order.
#[derive(Debug)]
pub struct Replace {
    content: Vec<ReplaceRule>,
    title: Vec<ReplaceRule>,
    metadata: Vec<ReplaceRule>,
}

impl Replace {
    /// # Errors
    ///
    /// Returns [`ProcessorError::InvalidOptions`] for unknown keys or a rule
    /// with an empty `find`.
    pub fn from_options(options: &StageOptions) -> Result<Self, ProcessorError> {
        let options: ReplaceOptions = parse_options(options)?;
        for (table, rules) in [
            ("content", &options.content),
            ("title", &options.title),
            ("metadata", &options.metadata),
        ] {
            if rules.iter().any(|rule| rule.find.is_empty()) {
                return Err(ProcessorError::InvalidOptions(format!(
                    "empty `find` in {table} rules"
                )));
            }
        }
        Ok(Self {
            content: options.content,
            title: options.title,
            metadata: options.metadata,
        })
    }
}

fn apply(rules: &[ReplaceRule], text: &str) -> String {
    rules
        .iter()
        .fold(text.to_string(), |acc, rule| acc.replace(&rule.find, &rule.replace))
}

impl Processor for Replace {
    fn process_book_info(&self, mut info: BookInfo) -> Result<BookInfo, ProcessorError> {
        info.book_name = apply(&self.metadata, &info.book_name);
        info.author = apply(&self.metadata, &info.author);
        info.summary = apply(&self.metadata, &info.summary);
        for tag in &mut info.tags {
            *tag = apply(&self.metadata, tag);
        }
        for volume in &mut info.volumes {
            volume.volume_name = apply(&self.title, &volume.volume_name);
            for descriptor in &mut volume.chapters {
                descriptor.title = apply(&self.title, &descriptor.title);
            }
        }
        Ok(info)
    }

    fn process_chapter(&self, mut chapter: Chapter) -> Result<Chapter, ProcessorError> {
        chapter.title = apply(&self.title, &chapter.title);
        chapter.content = apply(&self.content, &chapter.content);
        Ok(chapter)
    }
}
