//! Resolved build configuration.
//!
//! [`BuildConfig`] is the CLI after normalisation: the publish site gets a
//! trailing slash so filenames can be joined onto it, and the skip and
//! regenerate lists are trimmed of blanks.

use crate::cli::Cli;
use std::path::{Path, PathBuf};
use url::Url;

/// Built-in `index.html` template.
pub const DEFAULT_TEMPLATE: &str = include_str!("../static/index.html");

/// Paths and names of the external e-book executables.
#[derive(Debug, Clone)]
pub struct Tools {
    pub convert: String,
    pub meta: String,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub publish_site: Url,
    pub publish_dir: PathBuf,
    pub recipes_dir: PathBuf,
    pub registry: PathBuf,
    pub template: Option<PathBuf>,
    pub tools: Tools,
    pub cover_font: PathBuf,
    pub categories: Vec<String>,
    pub skip: Vec<String>,
    pub regenerate: Vec<String>,
    pub verbose: bool,
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a site URL, making sure it ends with `/`.
pub fn normalize_site(site: &str) -> Result<Url, url::ParseError> {
    let trimmed = site.trim().trim_end_matches('/');
    Url::parse(&format!("{trimmed}/"))
}

impl BuildConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, url::ParseError> {
        Ok(Self {
            publish_site: normalize_site(&cli.publish_site)?,
            publish_dir: cli.publish_dir,
            recipes_dir: cli.recipes_dir,
            registry: cli.registry,
            template: cli.template,
            tools: Tools {
                convert: cli.convert_tool,
                meta: cli.meta_tool,
            },
            cover_font: cli.cover_font,
            categories: clean_list(cli.categories),
            skip: clean_list(cli.skip),
            regenerate: clean_list(cli.regenerate),
            verbose: cli.verbose,
        })
    }

    pub fn is_skipped(&self, recipe: &str) -> bool {
        self.skip.iter().any(|s| s == recipe)
    }

    pub fn is_forced(&self, recipe: &str) -> bool {
        self.regenerate.iter().any(|s| s == recipe)
    }

    pub fn publish_path(&self, file_name: &str) -> PathBuf {
        self.publish_dir.join(file_name)
    }

    /// Recipe argument for the converter: a local `.recipe` file if present,
    /// otherwise the identifier as a built-in recipe name.
    pub fn recipe_source(&self, recipe: &str) -> (String, bool) {
        let local = self.recipes_dir.join(format!("{recipe}.recipe"));
        if Path::new(&local).is_file() {
            (local.display().to_string(), true)
        } else {
            (format!("{recipe}.recipe"), false)
        }
    }

    /// A config rooted at `publish_dir`, used by tests across the crate.
    #[cfg(test)]
    pub fn for_tests(publish_dir: &Path, site: &str) -> Self {
        Self {
            publish_site: normalize_site(site).expect("valid test url"),
            publish_dir: publish_dir.to_path_buf(),
            recipes_dir: publish_dir.join("recipes"),
            registry: publish_dir.join("recipes.yaml"),
            template: None,
            tools: Tools {
                convert: "ebook-convert".into(),
                meta: "ebook-meta".into(),
            },
            cover_font: PathBuf::from("/nonexistent/font.ttf"),
            categories: vec!["news".into(), "magazines".into(), "books".into()],
            skip: Vec::new(),
            regenerate: Vec::new(),
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_normalize_site_adds_single_slash() {
        assert_eq!(
            normalize_site("https://example.com/news").unwrap().as_str(),
            "https://example.com/news/"
        );
        assert_eq!(
            normalize_site("https://example.com/news///").unwrap().as_str(),
            "https://example.com/news/"
        );
        assert!(normalize_site("not a url").is_err());
    }

    #[test]
    fn test_from_cli_cleans_lists() {
        let cli = Cli::parse_from([
            "recipe_press",
            "https://example.com",
            "--skip",
            "ft, ,wsj ",
        ]);
        let config = BuildConfig::from_cli(cli).unwrap();
        assert_eq!(config.skip, vec!["ft", "wsj"]);
        assert!(config.is_skipped("wsj"));
        assert!(!config.is_forced("wsj"));
        assert_eq!(config.publish_site.as_str(), "https://example.com/");
    }

    #[test]
    fn test_recipe_source_prefers_local_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = BuildConfig::for_tests(tmp.path(), "https://example.com");
        assert_eq!(config.recipe_source("foo"), ("foo.recipe".to_string(), false));

        std::fs::create_dir_all(&config.recipes_dir).unwrap();
        std::fs::write(config.recipes_dir.join("foo.recipe"), "# recipe").unwrap();
        let (source, local) = config.recipe_source("foo");
        assert!(local);
        assert!(source.ends_with("foo.recipe"));
    }
}
