//! Data models shared by every pipeline stage.
//!
//! - [`RecipeDescriptor`]: one row of the recipe registry
//! - [`RecipeOutput`]: one artifact produced (or restored from cache) during a build
//! - [`PublishIndex`]: the `index.json` manifest, read as cache and rewritten as output
//! - [`RunLog`]: last successful live run per recipe, persisted as `last_run.json`
//! - [`FailureReason`]: why a single recipe contributed nothing to the build

use crate::schedule::Schedule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

fn default_timeout() -> u64 {
    180
}

fn default_true() -> bool {
    true
}

fn default_retry_attempts() -> u32 {
    1
}

/// Configuration for a single publication.
///
/// Descriptors are read once from the registry at start-up and are
/// read-only for the rest of the build, except for `last_run`, which is
/// filled from the persisted [`RunLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeDescriptor {
    /// Recipe identifier passed to the converter (`<id>.recipe` or a built-in name).
    pub recipe: String,
    /// Display name used as the publication key in the index. Defaults to `recipe`.
    #[serde(default)]
    pub name: Option<String>,
    /// Filename prefix for every artifact of this publication.
    pub slug: String,
    /// Extension of the primary artifact produced by the recipe.
    pub src_ext: String,
    /// Extra formats converted from the primary artifact, in production order.
    #[serde(default)]
    pub target_ext: Vec<String>,
    /// Category label used to group publications in the index.
    pub category: String,
    /// Wall-clock limit for one converter invocation, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Whether to replace the embedded cover with a generated text cover.
    #[serde(default = "default_true")]
    pub overwrite_cover: bool,
    /// When the recipe should run live.
    #[serde(default)]
    pub enable_on: Schedule,
    /// Offset applied to "now" before evaluating calendar predicates.
    #[serde(default)]
    pub utc_offset_hours: f64,
    /// How many times a failed (non-timeout) conversion is retried.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Extra converter flags keyed by output extension.
    #[serde(default)]
    pub conv_options: BTreeMap<String, Vec<String>>,
    /// Last successful live run, loaded from [`RunLog`].
    #[serde(skip)]
    pub last_run: Option<DateTime<Utc>>,
}

impl RecipeDescriptor {
    /// Publication name, falling back to the recipe identifier.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.recipe)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// One artifact produced for a publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeOutput {
    /// Recipe identifier this artifact belongs to.
    pub recipe: String,
    /// Publication name (index key).
    pub name: String,
    /// Title read from the artifact's metadata, if any.
    pub title: Option<String>,
    /// Current filename inside the publish directory.
    pub file_name: String,
    /// Date-stamped filename the artifact is renamed to when the build commits.
    pub rename_to: String,
    /// Extension of this artifact.
    pub ext: String,
    /// Publish timestamp read from metadata, or the build time.
    pub published: DateTime<Utc>,
    pub category: String,
}

impl RecipeOutput {
    /// Whether the artifact still has to be renamed at commit time.
    pub fn needs_rename(&self) -> bool {
        self.file_name != self.rename_to
    }
}

/// The `index.json` manifest: publication name to ordered filenames.
///
/// Serialized as a flat JSON object with an extra `_generated` key holding
/// the Unix timestamp of the build. Keys are emitted in sorted order so
/// rebuilding from the same outputs gives the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishIndex {
    pub entries: BTreeMap<String, Vec<String>>,
    pub generated: i64,
}

impl PublishIndex {
    pub const GENERATED_KEY: &'static str = "_generated";

    /// Parse a manifest, ignoring any key that is not a list of filenames.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let raw: Map<String, Value> = serde_json::from_str(text)?;
        let mut index = PublishIndex::default();
        for (key, value) in raw {
            if key == Self::GENERATED_KEY {
                index.generated = value.as_f64().map(|v| v as i64).unwrap_or_default();
                continue;
            }
            if let Value::Array(items) = value {
                let files = items
                    .into_iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                index.entries.insert(key, files);
            }
        }
        Ok(index)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        let mut raw = Map::new();
        for (name, files) in &self.entries {
            raw.insert(name.clone(), Value::from(files.clone()));
        }
        raw.insert(Self::GENERATED_KEY.to_string(), Value::from(self.generated));
        serde_json::to_string_pretty(&raw)
    }

    pub fn files_for(&self, name: &str) -> Option<&[String]> {
        self.entries
            .get(name)
            .map(Vec::as_slice)
            .filter(|files| !files.is_empty())
    }
}

/// Last successful live run per recipe identifier, as Unix timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunLog(pub BTreeMap<String, i64>);

impl RunLog {
    pub fn last_run(&self, recipe: &str) -> Option<DateTime<Utc>> {
        self.0
            .get(recipe)
            .filter(|ts| **ts > 0)
            .and_then(|ts| DateTime::from_timestamp(*ts, 0))
    }

    pub fn record(&mut self, recipe: &str, at: DateTime<Utc>) {
        self.0.insert(recipe.to_string(), at.timestamp());
    }
}

/// Why one recipe produced nothing. Never fatal to the batch.
#[derive(Debug, Error)]
pub enum FailureReason {
    #[error("`{program}` timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("`{program}` exited with {status}: {stderr}")]
    ExitStatus {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no {ext} output found for slug {slug}")]
    MissingOutput { slug: String, ext: String },
    #[error("cache fetch failed: {0}")]
    Cache(#[from] crate::cache::CacheError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FailureReason {
    /// Timeouts abandon the recipe for this run; everything else may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureReason::ExitStatus { .. } | FailureReason::Spawn { .. })
    }
}
