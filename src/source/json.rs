//! Parser for sources that serve the crate's own JSON shapes.

use serde::Deserialize;

use super::{ParseError, Parser, RawPage};
use crate::book::{BookInfo, Chapter, ExtraMap};

/// One page of a chapter.
#[derive(Debug, Deserialize)]
struct ChapterPage {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    extra: ExtraMap,
}

/// Decodes `BookInfo` and chapter pages encoded as JSON.
///
/// Chapter pages are `{"title", "content", "extra"?, "next_page"?}` objects;
/// contents of multi-page chapters are joined with a newline, the title comes
/// from the first page that has one and `extra` maps are merged in page order.
/// A chapter whose combined content is blank parses to `None`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn parse_book_info(&self, pages: &[RawPage]) -> Result<Option<BookInfo>, ParseError> {
        let Some(page) = pages.first() else {
            return Ok(None);
        };
        if page.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(page)
            .map(Some)
            .map_err(|e| ParseError::new("book info", e))
    }

    fn parse_chapter(
        &self,
        pages: &[RawPage],
        chapter_id: &str,
    ) -> Result<Option<Chapter>, ParseError> {
        let mut title = String::new();
        let mut parts = Vec::with_capacity(pages.len());
        let mut extra = ExtraMap::new();

        for page in pages.iter().filter(|page| !page.trim().is_empty()) {
            let decoded: ChapterPage = serde_json::from_str(page)
                .map_err(|e| ParseError::new(format!("chapter {chapter_id}"), e))?;
            if title.is_empty() {
                title = decoded.title;
            }
            if !decoded.content.trim().is_empty() {
                parts.push(decoded.content);
            }
            extra.extend(decoded.extra);
        }

        if parts.is_empty() {
            return Ok(None);
        }

        Ok(Some(Chapter {
            id: chapter_id.to_string(),
            title,
            content: parts.join("\n"),
            extra,
        }))
    }
}
