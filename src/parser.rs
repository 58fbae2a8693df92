use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser::{self, ParseFeedError};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to parse feed: {0}")]
    Feed(#[from] ParseFeedError),
}

/// A single headline extracted from a feed document.
///
/// Only [`parse_feed`] builds these, so a `FeedEntry` always has a non-empty
/// title and an absolute link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    title: String,
    link: String,
    published_at: Option<DateTime<Utc>>,
    snippet: Option<String>,
}

impl FeedEntry {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    pub fn snippet(&self) -> Option<&str> {
        self.snippet.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    pub entries: Vec<FeedEntry>,
    /// Items skipped because they had no usable title or link
    pub dropped: usize,
}

/// Parse one raw RSS/Atom document, keeping the document's item order.
pub fn parse_feed(xml: &str) -> Result<ParsedFeed, ParseError> {
    let feed = parser::parse(xml.as_bytes())?;

    let mut parsed = ParsedFeed::default();
    for entry in feed.entries {
        match build_entry(entry) {
            Some(entry) => parsed.entries.push(entry),
            None => parsed.dropped += 1,
        }
    }

    Ok(parsed)
}

/// Whether an item carries enough to be shown: a non-blank title and an
/// absolute http(s) link.
pub fn is_displayable(title: &str, link: &str) -> bool {
    if title.trim().is_empty() {
        return false;
    }
    match Url::parse(link.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

fn build_entry(entry: Entry) -> Option<FeedEntry> {
    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default();
    // Prefer the alternate link, Atom entries often list replies/self first
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default();

    if !is_displayable(&title, &link) {
        return None;
    }

    let published_at = entry.published.or(entry.updated);
    let snippet = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|raw| strip_html(&raw))
        .filter(|s| !s.is_empty());

    Some(FeedEntry {
        title,
        link,
        published_at,
        snippet,
    })
}

/// Reduce an HTML fragment to plain text with collapsed whitespace.
pub fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;

    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }

    html_escape::decode_html_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
