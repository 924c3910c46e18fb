//! Date-labelled pseudo-sections for single-feed publications.
//!
//! Some publications only expose one flat list of articles. To give the
//! resulting e-book a usable table of contents, articles are sorted newest
//! first and split into runs that share the same local calendar day; each
//! run becomes one section titled with that day.
//!
//! Nothing in the build loop calls this; it is the library entry point for
//! recipe tooling that assembles single-feed publications.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use itertools::Itertools;

/// Default section label, e.g. `Tue, 02 Jan 2024`.
pub const DEFAULT_LABEL_FORMAT: &str = "%a, %d %b %Y";

#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub published: DateTime<Utc>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: String,
    pub date: NaiveDate,
    pub articles: Vec<Article>,
}

/// Group `articles` into per-day sections in display order (newest day first).
///
/// Days are taken in `offset`, so an article published at 23:30 UTC lands on
/// the next day for a publication in UTC+1.
pub fn group_by_day(articles: Vec<Article>, offset: FixedOffset, label_format: &str) -> Vec<Section> {
    let sorted = articles
        .into_iter()
        .sorted_by(|a, b| b.published.cmp(&a.published));

    let chunks = sorted.chunk_by(|article| article.published.with_timezone(&offset).date_naive());

    let mut sections = Vec::new();
    for (date, group) in &chunks {
        sections.push(Section {
            title: date.format(label_format).to_string(),
            date,
            articles: group.collect(),
        });
    }
    tracing::debug!(sections = sections.len(), "Grouped articles by day");
    sections
}
