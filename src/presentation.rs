use chrono::{DateTime, FixedOffset, Utc};

use crate::parser::FeedEntry;

/// A feed entry ready for the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayEntry {
    pub title: String,
    pub link: String,
    pub snippet: Option<String>,
    pub published_at: Option<String>,
}

impl DisplayEntry {
    pub fn from_entry(entry: &FeedEntry, offset: &FixedOffset) -> Self {
        Self {
            title: entry.title().to_string(),
            link: entry.link().to_string(),
            snippet: entry.snippet().map(str::to_string),
            published_at: entry
                .published_at()
                .map(|published| format_published(published, offset)),
        }
    }
}

pub fn present(entries: &[FeedEntry], offset: &FixedOffset) -> Vec<DisplayEntry> {
    entries
        .iter()
        .map(|entry| DisplayEntry::from_entry(entry, offset))
        .collect()
}

/// Short month/day/time form, e.g. `Dec 9, 12:00 PM`.
pub fn format_published(published: DateTime<Utc>, offset: &FixedOffset) -> String {
    published
        .with_timezone(offset)
        .format("%b %-d, %I:%M %p")
        .to_string()
}
