use serde::{Deserialize, Serialize};

use super::ExtraMap;

/// Book-level metadata plus the ordered volume/chapter structure.
///
/// Versioned per generation exactly like chapters: processors may rewrite
/// titles and descriptions, so each generation stores its own copy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookInfo {
    #[serde(default)]
    pub book_name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_status: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    /// Source-specific fields carried through untouched.
    #[serde(flatten)]
    pub extra: ExtraMap,
}

/// An ordered group of chapters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(default)]
    pub volume_name: String,
    #[serde(default)]
    pub chapters: Vec<ChapterDescriptor>,
}

/// A chapter entry in the table of contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterDescriptor {
    #[serde(rename = "chapterId")]
    pub chapter_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_accessible")]
    pub accessible: bool,
}

fn default_accessible() -> bool {
    true
}

impl ChapterDescriptor {
    /// Creates an accessible descriptor with an empty URL.
    pub fn new(chapter_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            chapter_id: chapter_id.into(),
            title: title.into(),
            url: String::new(),
            accessible: true,
        }
    }
}

impl BookInfo {
    /// Iterates over every chapter descriptor in volume order.
    pub fn chapters(&self) -> impl Iterator<Item = &ChapterDescriptor> {
        self.volumes.iter().flat_map(|volume| volume.chapters.iter())
    }

    /// Number of chapters across all volumes.
    #[must_use]
    pub fn chapter_count(&self) -> usize {
        self.volumes.iter().map(|volume| volume.chapters.len()).sum()
    }
}
