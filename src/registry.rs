//! The recipe registry: an ordered YAML list of [`RecipeDescriptor`]s.
//!
//! Registry order is the processing order and the fallback display order
//! for publications that produced nothing.
//!
//! ```yaml
//! - recipe: economist
//!   name: The Economist
//!   slug: economist
//!   src_ext: epub
//!   target_ext: [mobi, pdf]
//!   category: magazines
//!   enable_on: { weekdays: [Fri, Sat] }
//!   utc_offset_hours: 0
//! ```

use crate::models::{RecipeDescriptor, RunLog};
use crate::schedule::validate_offset;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid registry: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("duplicate recipe identifier `{0}`")]
    Duplicate(String),
    #[error("recipe `{0}` has an empty slug or extension")]
    Incomplete(String),
    #[error("recipe `{recipe}`: {reason}")]
    Invalid { recipe: String, reason: String },
}

/// Parse and validate a registry document.
///
/// Extensions are normalised to lowercase without a leading dot, and
/// `target_ext` becomes an ordered set that never repeats `src_ext`.
pub fn parse(text: &str) -> Result<Vec<RecipeDescriptor>, RegistryError> {
    let mut recipes: Vec<RecipeDescriptor> = serde_yaml::from_str(text)?;
    let mut seen = HashSet::new();

    for recipe in &mut recipes {
        if !seen.insert(recipe.recipe.clone()) {
            return Err(RegistryError::Duplicate(recipe.recipe.clone()));
        }
        recipe.src_ext = normalize_ext(&recipe.src_ext);
        if recipe.slug.trim().is_empty() || recipe.src_ext.is_empty() {
            return Err(RegistryError::Incomplete(recipe.recipe.clone()));
        }
        validate_offset(recipe.utc_offset_hours)
            .and_then(|()| recipe.enable_on.validate())
            .map_err(|reason| RegistryError::Invalid {
                recipe: recipe.recipe.clone(),
                reason,
            })?;

        let mut targets: Vec<String> = Vec::new();
        for ext in recipe.target_ext.iter().map(|e| normalize_ext(e)) {
            if ext.is_empty() || ext == recipe.src_ext || targets.contains(&ext) {
                warn!(recipe = %recipe.recipe, %ext, "Ignoring redundant target extension");
                continue;
            }
            targets.push(ext);
        }
        recipe.target_ext = targets;
    }
    Ok(recipes)
}

fn normalize_ext(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Load the registry from disk.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load(path: &Path) -> Result<Vec<RecipeDescriptor>, RegistryError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
    let recipes = parse(&text)?;
    info!(count = recipes.len(), "Loaded recipe registry");
    Ok(recipes)
}

/// Fill every descriptor's `last_run` from the persisted run log.
pub fn apply_run_log(recipes: &mut [RecipeDescriptor], log: &RunLog) {
    for recipe in recipes {
        recipe.last_run = log.last_run(&recipe.recipe);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Rule, Schedule};
    use chrono::Weekday;

    const SAMPLE: &str = r#"
- recipe: economist
  name: The Economist
  slug: economist
  src_ext: .EPUB
  target_ext: [mobi, epub, mobi, pdf]
  category: magazines
  enable_on: { weekdays: [Fri, Sat] }
- recipe: guardian
  slug: guardian
  src_ext: epub
  category: news
  timeout: 600
"#;

    #[test]
    fn test_parse_normalizes() {
        let recipes = parse(SAMPLE).unwrap();
        assert_eq!(recipes.len(), 2);
        let economist = &recipes[0];
        assert_eq!(economist.name(), "The Economist");
        assert_eq!(economist.src_ext, "epub");
        assert_eq!(economist.target_ext, vec!["mobi", "pdf"]);
        assert_eq!(
            economist.enable_on,
            Schedule::Rule(Rule::Weekdays(vec![Weekday::Fri, Weekday::Sat]))
        );
        assert_eq!(recipes[1].timeout, 600);
        assert_eq!(recipes[1].name(), "guardian");
    }

    #[test]
    fn test_parse_rejects_duplicates() {
        let text = "- {recipe: a, slug: a, src_ext: epub, category: news}\n- {recipe: a, slug: b, src_ext: epub, category: news}\n";
        assert!(matches!(parse(text), Err(RegistryError::Duplicate(id)) if id == "a"));
    }

    #[test]
    fn test_parse_rejects_out_of_range_times() {
        let offset = "- {recipe: a, slug: a, src_ext: epub, category: news, utc_offset_hours: 1.0e13}\n";
        assert!(matches!(parse(offset), Err(RegistryError::Invalid { recipe, .. }) if recipe == "a"));

        let drift = "- {recipe: b, slug: b, src_ext: epub, category: news, enable_on: {every_hours: {hours: 1, drift_minutes: 1000000000000000}}}\n";
        assert!(matches!(parse(drift), Err(RegistryError::Invalid { recipe, .. }) if recipe == "b"));

        let fine = "- {recipe: c, slug: c, src_ext: epub, category: news, utc_offset_hours: -3.5, enable_on: {every_days: {days: 7, drift_minutes: 90}}}\n";
        assert!(parse(fine).is_ok());
    }

    #[test]
    fn test_parse_rejects_incomplete() {
        let text = "- {recipe: a, slug: '', src_ext: epub, category: news}\n";
        assert!(matches!(parse(text), Err(RegistryError::Incomplete(_))));
    }

    #[test]
    fn test_apply_run_log() {
        let mut recipes = parse(SAMPLE).unwrap();
        let log: RunLog = serde_json::from_str(r#"{"guardian": 1700000000}"#).unwrap();
        apply_run_log(&mut recipes, &log);
        assert!(recipes[0].last_run.is_none());
        assert_eq!(recipes[1].last_run.unwrap().timestamp(), 1700000000);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = load(Path::new("/definitely/not/here.yaml")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Read { .. }));
    }
}
