//! Builds the publish index from a build's outputs.
//!
//! Outputs are grouped by category, then by publication. Categories follow
//! the configured priority list. Within a category, publications with
//! artifacts come first, newest publish date first; publications that
//! produced nothing follow in registry order and are shown as unavailable.
//! Every registered publication is listed.

use crate::models::{PublishIndex, RecipeDescriptor, RecipeOutput};
use crate::ordering;
use crate::outputs::html;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::cmp::Reverse;
use std::path::Path;
use tracing::{debug, warn};

/// One downloadable file of a publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    pub file_name: String,
    pub ext: String,
    pub size: u64,
}

/// A registered publication and whatever it produced this build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    pub recipe: String,
    pub name: String,
    pub category: String,
    pub title: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub files: Vec<ListedFile>,
}

impl Publication {
    pub fn is_available(&self) -> bool {
        !self.files.is_empty()
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryGroup {
    pub category: String,
    pub publications: Vec<Publication>,
}

/// The category → publication → file hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub categories: Vec<CategoryGroup>,
}

impl Listing {
    pub fn publications(&self) -> impl Iterator<Item = &Publication> {
        self.categories.iter().flat_map(|c| c.publications.iter())
    }
}

fn publication_for(descriptor: &RecipeDescriptor, outputs: &[RecipeOutput], publish_dir: &Path) -> Publication {
    let mine: Vec<&RecipeOutput> = outputs.iter().filter(|o| o.recipe == descriptor.recipe).collect();

    let mut files = Vec::new();
    for output in &mine {
        match std::fs::metadata(publish_dir.join(&output.file_name)) {
            Ok(meta) if meta.is_file() => files.push(ListedFile {
                file_name: output.file_name.clone(),
                ext: output.ext.clone(),
                size: meta.len(),
            }),
            _ => warn!(
                recipe = %descriptor.recipe,
                file = %output.file_name,
                "Output missing from publish directory; leaving it out of the index"
            ),
        }
    }

    Publication {
        recipe: descriptor.recipe.clone(),
        name: descriptor.name().to_string(),
        category: descriptor.category.clone(),
        title: mine.iter().find_map(|o| o.title.clone()),
        published: mine.iter().map(|o| o.published).max(),
        files,
    }
}

/// Group outputs into the listing hierarchy.
///
/// `outputs` must be in production order (primary format first); that order
/// is kept for each publication's files.
pub fn build_listing(
    registry: &[RecipeDescriptor],
    outputs: &[RecipeOutput],
    priority: &[String],
    publish_dir: &Path,
) -> Listing {
    let mut categories: Vec<String> = registry.iter().map(|d| d.category.clone()).unique().collect();
    ordering::sort_labels(priority, &mut categories);

    let groups = categories
        .into_iter()
        .map(|category| {
            let publications = registry
                .iter()
                .filter(|d| d.category == category)
                .map(|d| publication_for(d, outputs, publish_dir))
                .sorted_by_key(|p| (!p.is_available(), Reverse(p.published)))
                .collect::<Vec<_>>();
            debug!(%category, count = publications.len(), "Grouped category");
            CategoryGroup {
                category,
                publications,
            }
        })
        .collect();

    Listing { categories: groups }
}

/// The machine-readable manifest for a listing.
pub fn publish_index(listing: &Listing, generated: i64) -> PublishIndex {
    let entries = listing
        .publications()
        .filter(|p| p.is_available())
        .map(|p| {
            (
                p.name.clone(),
                p.files.iter().map(|f| f.file_name.clone()).collect(),
            )
        })
        .collect();
    PublishIndex { entries, generated }
}

/// Build the JSON manifest and the HTML listing fragment in one go.
///
/// # Arguments
///
/// * `registry` - Every registered publication, in registry order
/// * `outputs` - Artifacts produced this build, primary format first per recipe
/// * `priority` - Category display order
/// * `publish_dir` - Directory the artifacts live in; files missing there are left out
/// * `generated` - Unix timestamp stored under `_generated`
///
/// # Returns
///
/// The `index.json` manifest, the HTML listing fragment and the listing
/// both were rendered from (reused for the feed).
pub fn build_index(
    registry: &[RecipeDescriptor],
    outputs: &[RecipeOutput],
    priority: &[String],
    publish_dir: &Path,
    generated: i64,
) -> (PublishIndex, String, Listing) {
    let listing = build_listing(registry, outputs, priority, publish_dir);
    let index = publish_index(&listing, generated);
    let fragment = html::render_listing(&listing);
    (index, fragment, listing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const REGISTRY: &str = r#"
- {recipe: ft, slug: ft, src_ext: epub, category: news}
- {recipe: blogpost, slug: blogpost, src_ext: epub, category: blog}
- {recipe: guardian, name: The Guardian, slug: guardian, src_ext: epub, target_ext: [mobi], category: news}
- {recipe: economist, slug: economist, src_ext: epub, category: magazine}
- {recipe: scmp, slug: scmp, src_ext: epub, category: news}
- {recipe: poetry, slug: poetry, src_ext: epub, category: books}
"#;

    fn output(recipe: &str, name: &str, file: &str, ext: &str, day: u32, category: &str) -> RecipeOutput {
        RecipeOutput {
            recipe: recipe.into(),
            name: name.into(),
            title: Some(format!("{name}: Jan {day}")),
            file_name: file.into(),
            rename_to: file.into(),
            ext: ext.into(),
            published: Utc.with_ymd_and_hms(2024, 1, day, 6, 0, 0).unwrap(),
            category: category.into(),
        }
    }

    fn fixture() -> (tempfile::TempDir, Vec<RecipeDescriptor>, Vec<RecipeOutput>) {
        let tmp = tempfile::tempdir().unwrap();
        let outputs = vec![
            output("guardian", "The Guardian", "guardian-2024-01-02.epub", "epub", 2, "news"),
            output("guardian", "The Guardian", "guardian-2024-01-02.mobi", "mobi", 2, "news"),
            output("scmp", "scmp", "scmp-2024-01-03.epub", "epub", 3, "news"),
            output("economist", "economist", "economist-2024-01-01.epub", "epub", 1, "magazine"),
            output("blogpost", "blogpost", "blogpost-2024-01-01.epub", "epub", 1, "blog"),
        ];
        for o in &outputs {
            std::fs::write(tmp.path().join(&o.file_name), vec![0u8; 2048]).unwrap();
        }
        (tmp, registry::parse(REGISTRY).unwrap(), outputs)
    }

    fn priority() -> Vec<String> {
        vec!["news".into(), "magazine".into(), "books".into()]
    }

    #[test]
    fn test_listing_order() {
        let (tmp, registry, outputs) = fixture();
        let listing = build_listing(&registry, &outputs, &priority(), tmp.path());

        let categories: Vec<_> = listing.categories.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(categories, vec!["news", "magazine", "books", "blog"]);

        let news: Vec<_> = listing.categories[0].publications.iter().map(|p| p.recipe.as_str()).collect();
        assert_eq!(news, vec!["scmp", "guardian", "ft"]);
        assert!(!listing.categories[0].publications[2].is_available());

        let guardian = &listing.categories[0].publications[1];
        let files: Vec<_> = guardian.files.iter().map(|f| f.ext.as_str()).collect();
        assert_eq!(files, vec!["epub", "mobi"]);
        assert_eq!(guardian.files[0].size, 2048);
        assert_eq!(guardian.display_title(), "The Guardian: Jan 2");

        assert!(!listing.categories[2].publications[0].is_available());
    }

    #[test]
    fn test_missing_files_are_not_listed() {
        let (tmp, registry, outputs) = fixture();
        std::fs::remove_file(tmp.path().join("guardian-2024-01-02.mobi")).unwrap();
        let (index, _, _) = build_index(&registry, &outputs, &priority(), tmp.path(), 0);
        assert_eq!(index.files_for("The Guardian").unwrap(), &["guardian-2024-01-02.epub"]);
        assert!(index.files_for("ft").is_none());
        for files in index.entries.values() {
            for f in files {
                assert!(tmp.path().join(f).is_file());
            }
        }
    }

    #[test]
    fn test_json_is_idempotent_apart_from_generated() {
        let (tmp, registry, outputs) = fixture();
        let (first, html_first, _) = build_index(&registry, &outputs, &priority(), tmp.path(), 100);
        let (mut second, html_second, _) = build_index(&registry, &outputs, &priority(), tmp.path(), 200);
        assert_ne!(first.generated, second.generated);
        second.generated = first.generated;
        assert_eq!(first.to_json_string().unwrap(), second.to_json_string().unwrap());
        assert_eq!(html_first, html_second);
    }
}
