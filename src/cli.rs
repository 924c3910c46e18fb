//! Command-line interface definitions for Recipe Press.
//!
//! All options can be provided via flags; `skip`, `regenerate` and `verbose`
//! are also read from environment variables of the same name, which is how
//! CI jobs usually pass them.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Command-line arguments for a build.
///
/// # Examples
///
/// ```sh
/// # Build everything that is due and publish to ./public
/// recipe_press https://example.github.io/news/
///
/// # Force two recipes to run live, skip one entirely
/// regenerate=economist,guardian skip=ft recipe_press https://example.github.io/news -v
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Base URL of the published site; its index.json is the cache source
    pub publish_site: String,

    /// Log at debug level and pass -vv to the converter
    #[arg(short, long, env = "verbose", action = ArgAction::SetTrue)]
    pub verbose: bool,

    /// Recipe identifiers to bypass entirely
    #[arg(long, env = "skip", value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Recipe identifiers to run live even when a cached copy exists
    #[arg(long, env = "regenerate", value_delimiter = ',')]
    pub regenerate: Vec<String>,

    /// Directory receiving the generated artifacts and index files
    #[arg(long, default_value = "public")]
    pub publish_dir: PathBuf,

    /// Directory holding `<recipe>.recipe` files
    #[arg(long, default_value = "recipes")]
    pub recipes_dir: PathBuf,

    /// Recipe registry (YAML list of recipe descriptors)
    #[arg(long, default_value = "recipes.yaml")]
    pub registry: PathBuf,

    /// HTML template for index.html (built-in template when omitted)
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// E-book conversion executable
    #[arg(long, default_value = "ebook-convert")]
    pub convert_tool: String,

    /// E-book metadata executable
    #[arg(long, default_value = "ebook-meta")]
    pub meta_tool: String,

    /// TrueType font used for generated covers
    #[arg(long, default_value = "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf")]
    pub cover_font: PathBuf,

    /// Category display order; unlisted categories follow alphabetically
    #[arg(long, value_delimiter = ',', default_value = "news,magazines,books")]
    pub categories: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["recipe_press", "https://example.com/news"]);
        assert_eq!(cli.publish_site, "https://example.com/news");
        assert_eq!(cli.publish_dir, PathBuf::from("public"));
        assert_eq!(cli.convert_tool, "ebook-convert");
        assert_eq!(cli.meta_tool, "ebook-meta");
        assert_eq!(cli.categories, vec!["news", "magazines", "books"]);
        assert!(cli.template.is_none());
    }

    #[test]
    fn test_cli_lists_and_verbose() {
        let cli = Cli::parse_from([
            "recipe_press",
            "https://example.com/",
            "-v",
            "--skip",
            "ft,wsj",
            "--regenerate",
            "economist",
            "--categories",
            "magazines,news",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.skip, vec!["ft", "wsj"]);
        assert_eq!(cli.regenerate, vec!["economist"]);
        assert_eq!(cli.categories, vec!["magazines", "news"]);
    }

    #[test]
    fn test_cli_requires_site() {
        assert!(Cli::try_parse_from(["recipe_press"]).is_err());
    }
}
