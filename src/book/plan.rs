use std::collections::HashSet;

use super::BookInfo;

/// Selection rules turning a [`BookInfo`] into a [`Plan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanFilter {
    /// First chapter to include (inclusive). If it never appears the plan is empty.
    pub start_id: Option<String>,
    /// Last chapter to include (inclusive).
    pub end_id: Option<String>,
    /// Chapter ids to leave out.
    pub ignore: HashSet<String>,
    /// Leave out chapters the table of contents marks inaccessible.
    pub accessible_only: bool,
}

/// Ordered, de-duplicated chapter ids targeted by one run. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    ids: Vec<String>,
}

impl Plan {
    /// Builds a plan from explicit ids, dropping duplicates while keeping
    /// first-seen order.
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let ids = ids
            .into_iter()
            .map(Into::into)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        Self { ids }
    }

    /// Flattens the book's volumes and applies `filter`.
    #[must_use]
    pub fn from_book_info(info: &BookInfo, filter: &PlanFilter) -> Self {
        let mut started = filter.start_id.is_none();
        let mut selected = Vec::new();

        for descriptor in info.chapters() {
            let id = descriptor.chapter_id.as_str();
            if !started {
                if filter.start_id.as_deref() == Some(id) {
                    started = true;
                } else {
                    continue;
                }
            }

            let wanted = !filter.ignore.contains(id)
                && (descriptor.accessible || !filter.accessible_only)
                && !id.is_empty();
            if wanted {
                selected.push(id.to_string());
            }

            if filter.end_id.as_deref() == Some(id) {
                break;
            }
        }

        Self::new(selected)
    }

    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|candidate| candidate == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::{ChapterDescriptor, Volume};

    fn book(ids: &[(&str, bool)]) -> BookInfo {
        let chapters = ids
            .iter()
            .map(|(id, accessible)| ChapterDescriptor {
                accessible: *accessible,
                ..ChapterDescriptor::new(*id, format!("Chapter {id}"))
            })
            .collect();
        BookInfo {
            volumes: vec![Volume {
                volume_name: "Main".to_string(),
                chapters,
            }],
            ..BookInfo::default()
        }
    }

    #[test]
    fn test_plan_without_filter_keeps_order() {
        let info = book(&[("3", true), ("1", true), ("2", true)]);
        let plan = Plan::from_book_info(&info, &PlanFilter::default());
        assert_eq!(plan.ids(), ["3", "1", "2"]);
    }

    #[test]
    fn test_plan_start_and_end_are_inclusive() {
        let info = book(&[("1", true), ("2", true), ("3", true), ("4", true)]);
        let filter = PlanFilter {
            start_id: Some("2".to_string()),
            end_id: Some("3".to_string()),
            ..PlanFilter::default()
        };
        assert_eq!(Plan::from_book_info(&info, &filter).ids(), ["2", "3"]);
    }

    #[test]
    fn test_plan_unknown_start_is_empty() {
        let info = book(&[("1", true), ("2", true)]);
        let filter = PlanFilter {
            start_id: Some("99".to_string()),
            ..PlanFilter::default()
        };
        assert!(Plan::from_book_info(&info, &filter).is_empty());
    }

    #[test]
    fn test_plan_ignore_and_accessibility() {
        let info = book(&[("1", true), ("2", false), ("3", true)]);
        let filter = PlanFilter {
            ignore: HashSet::from(["3".to_string()]),
            accessible_only: true,
            ..PlanFilter::default()
        };
        assert_eq!(Plan::from_book_info(&info, &filter).ids(), ["1"]);

        let lenient = PlanFilter {
            ignore: HashSet::from(["3".to_string()]),
            ..PlanFilter::default()
        };
        assert_eq!(Plan::from_book_info(&info, &lenient).ids(), ["1", "2"]);
    }

    #[test]
    fn test_plan_new_drops_duplicates() {
        let plan = Plan::new(["a", "b", "a", "c"]);
        assert_eq!(plan.ids(), ["a", "b", "c"]);
        assert!(plan.contains("c"));
        assert_eq!(plan.len(), 3);
    }
}
