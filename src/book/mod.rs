//! Book data model: chapters, stored records, book metadata and run plans.
//!
//! - [`Chapter`] - parsed chapter content, replaced wholesale on re-fetch
//! - [`ChapterRecord`] - a chapter as persisted in a [`crate::ChapterStore`]
//! - [`BookInfo`] - book metadata with ordered volumes of chapter descriptors
//! - [`Plan`] - the filtered, ordered chapter ids targeted by one run

mod chapter;
mod info;
mod plan;

pub use chapter::{Chapter, ChapterRecord, ExtraMap};
pub use info::{BookInfo, ChapterDescriptor, Volume};
pub use plan::{Plan, PlanFilter};
