//! Priority ordering for category labels.
//!
//! Labels listed in the priority list sort by their position; unlisted labels
//! sort after every listed one, alphabetically among themselves.

use std::cmp::Ordering;

/// Position given to labels missing from the priority list.
pub const UNLISTED: usize = 9_999;

/// Sort key for `label` under `priority`. Matching is case-insensitive.
pub fn priority_key(priority: &[String], label: &str) -> (usize, String) {
    let position = priority
        .iter()
        .position(|p| p.eq_ignore_ascii_case(label))
        .unwrap_or(UNLISTED);
    (position, label.to_lowercase())
}

pub fn compare(priority: &[String], a: &str, b: &str) -> Ordering {
    priority_key(priority, a).cmp(&priority_key(priority, b))
}

/// Sort labels in place by priority.
pub fn sort_labels<S: AsRef<str>>(priority: &[String], labels: &mut [S]) {
    labels.sort_by(|a, b| compare(priority, a.as_ref(), b.as_ref()));
}
