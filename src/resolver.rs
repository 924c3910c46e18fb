//! Locates a recipe's generated artifact and reads its publish metadata.
//!
//! After conversion the publish directory may hold several `slug*.ext`
//! files (a fresh `slug.ext` next to a cached `slug-2024-01-01.ext`). The
//! lexicographically greatest name is taken as the newest. That rule
//! depends on the naming scheme rather than on file times, so when the
//! modification times disagree the discrepancy is logged.
//!
//! The metadata executable prints free-text `Key : value` lines; only
//! `Title` and `Published` are used. A missing `Published` line falls back
//! to the build time.

use crate::config::BuildConfig;
use crate::invoker::run_with_timeout;
use crate::models::{FailureReason, RecipeDescriptor, RecipeOutput};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, instrument, warn};

static PUBLISHED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*Published\s*:\s*(?P<pub_date>[0-9]{4}-[0-9]{2}-[0-9]{2}T[0-9]{2}:[0-9]{2}:[0-9]{2})")
        .expect("valid published regex")
});

static TITLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*Title\s*:\s*(?P<title>.+?)\s*$").expect("valid title regex")
});

const META_TIMEOUT: Duration = Duration::from_secs(120);

/// Fields recovered from the metadata executable's output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub title: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

/// Parse `Title` and `Published` out of the metadata tool's output.
///
/// Timestamps are read without their zone suffix and treated as UTC.
pub fn parse_metadata(text: &str) -> Metadata {
    let published = PUBLISHED_RE
        .captures(text)
        .and_then(|caps| NaiveDateTime::parse_from_str(&caps["pub_date"], "%Y-%m-%dT%H:%M:%S").ok())
        .map(|naive| naive.and_utc());
    let title = TITLE_RE
        .captures(text)
        .map(|caps| caps["title"].to_string())
        .filter(|t| !t.is_empty());
    Metadata { title, published }
}

/// `{slug}-{YYYY-MM-DD}.{ext}`
pub fn rename_target(slug: &str, date: NaiveDate, ext: &str) -> String {
    format!("{}-{}.{}", slug, date.format("%Y-%m-%d"), ext)
}

fn matches_slug(file_name: &str, slug: &str, ext: &str) -> bool {
    file_name.starts_with(slug)
        && file_name
            .strip_suffix(ext)
            .is_some_and(|stem| stem.ends_with('.') && stem.len() > slug.len())
}

/// Filenames in `dir` matching `slug*.ext`, sorted ascending.
pub fn find_candidates(dir: &Path, slug: &str, ext: &str) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if matches_slug(name, slug, ext) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// The newest `slug*.ext` file, by filename order.
pub fn newest_candidate(dir: &Path, slug: &str, ext: &str) -> io::Result<Option<String>> {
    let names = find_candidates(dir, slug, ext)?;
    if names.len() > 1 {
        let by_mtime = names
            .iter()
            .max_by_key(|name| {
                std::fs::metadata(dir.join(name))
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH)
            })
            .cloned();
        let by_name = names.last().cloned();
        if by_mtime != by_name {
            warn!(
                %slug,
                %ext,
                by_name = ?by_name,
                by_mtime = ?by_mtime,
                "Newest artifact by name differs from newest by modification time; using name order"
            );
        }
    }
    Ok(names.last().cloned())
}

/// Run the metadata executable on `path` and parse its output.
#[instrument(level = "debug", skip(config), fields(path = %path.display()))]
pub async fn read_metadata(config: &BuildConfig, path: &Path) -> Result<Metadata, FailureReason> {
    let stdout = run_with_timeout(&config.tools.meta, &[path.display().to_string()], META_TIMEOUT).await?;
    let metadata = parse_metadata(&stdout);
    debug!(?metadata, "Read metadata");
    Ok(metadata)
}

/// Resolve the primary artifact for `descriptor` into a [`RecipeOutput`].
///
/// Looks for the newest `slug*.src_ext` file in the publish directory, reads
/// its metadata and computes the dated name it will be published under.
///
/// # Arguments
///
/// * `config` - Build configuration (publish directory, metadata tool)
/// * `descriptor` - The recipe whose artifact is resolved
/// * `now` - Build time, used as the publish date when the artifact carries none
///
/// # Returns
///
/// The output record with `file_name` set to the file found on disk and
/// `rename_to` set to `{slug}-{YYYY-MM-DD}.{src_ext}`.
///
/// # Errors
///
/// - [`FailureReason::MissingOutput`] when no matching file exists
/// - [`FailureReason::Io`] when the publish directory cannot be listed
/// - Any [`FailureReason`] from running the metadata tool
pub async fn resolve(
    config: &BuildConfig,
    descriptor: &RecipeDescriptor,
    now: DateTime<Utc>,
) -> Result<RecipeOutput, FailureReason> {
    let ext = &descriptor.src_ext;
    let file_name = newest_candidate(&config.publish_dir, &descriptor.slug, ext)?.ok_or_else(|| {
        FailureReason::MissingOutput {
            slug: descriptor.slug.clone(),
            ext: ext.clone(),
        }
    })?;
    resolve_file(config, descriptor, file_name, now).await
}

/// Like [`resolve`], for a primary artifact whose filename is already known.
#[instrument(level = "info", skip_all, fields(recipe = %descriptor.recipe, file = %file_name))]
pub async fn resolve_file(
    config: &BuildConfig,
    descriptor: &RecipeDescriptor,
    file_name: String,
    now: DateTime<Utc>,
) -> Result<RecipeOutput, FailureReason> {
    let ext = &descriptor.src_ext;
    if !config.publish_path(&file_name).is_file() {
        return Err(FailureReason::MissingOutput {
            slug: descriptor.slug.clone(),
            ext: ext.clone(),
        });
    }

    let metadata = read_metadata(config, &config.publish_path(&file_name)).await?;
    let published = match metadata.published {
        Some(published) => published,
        None => {
            warn!(file = %file_name, "No publish date in metadata; using build time");
            now
        }
    };

    let rename_to = rename_target(&descriptor.slug, published.date_naive(), ext);
    info!(file = %file_name, %rename_to, %published, "Resolved artifact");
    Ok(RecipeOutput {
        recipe: descriptor.recipe.clone(),
        name: descriptor.name().to_string(),
        title: metadata.title,
        file_name,
        rename_to,
        ext: ext.clone(),
        published,
        category: descriptor.category.clone(),
    })
}
