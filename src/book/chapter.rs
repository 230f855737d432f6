use serde::{Deserialize, Serialize};

/// Opaque structured metadata attached to a chapter (image positions,
/// encryption flags, ...).
pub type ExtraMap = serde_json::Map<String, serde_json::Value>;

/// A parsed chapter.
///
/// Produced by a [`crate::Parser`] from raw pages. Chapters are immutable once
/// created; a re-fetch replaces the stored chapter as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    /// Stable identifier within the book.
    pub id: String,
    /// Chapter title.
    pub title: String,
    /// Decoded text or markup.
    pub content: String,
    /// Source-specific metadata.
    #[serde(default)]
    pub extra: ExtraMap,
}

impl Chapter {
    /// Creates a chapter with empty metadata.
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            extra: ExtraMap::new(),
        }
    }

    /// Returns the chapter with one metadata entry added.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// A chapter as persisted in a chapter store.
///
/// `(chapter.id, source_id)` is unique within one store. Lower `priority`
/// values are preferred when several sources hold the same chapter id.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterRecord {
    pub chapter: Chapter,
    /// Source that produced this copy; `0` for single-source stores.
    pub source_id: i64,
    /// Lower is preferred.
    pub priority: i64,
    /// Stored but known incomplete; a later pass should retry it.
    pub need_refetch: bool,
}

impl ChapterRecord {
    /// Wraps a chapter as a clean single-source record.
    #[must_use]
    pub fn clean(chapter: Chapter) -> Self {
        Self {
            chapter,
            source_id: 0,
            priority: 0,
            need_refetch: false,
        }
    }

    /// Wraps a chapter as a record flagged for refetch.
    #[must_use]
    pub fn dirty(chapter: Chapter) -> Self {
        Self {
            need_refetch: true,
            ..Self::clean(chapter)
        }
    }

    /// Sets the source id and priority of the record.
    #[must_use]
    pub fn with_source(mut self, source_id: i64, priority: i64) -> Self {
        self.source_id = source_id;
        self.priority = priority;
        self
    }

    /// Chapter id of the record.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.chapter.id
    }
}
