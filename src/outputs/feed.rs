//! Atom feed of the latest artifacts.
//!
//! One `<entry>` per available publication, newest first, with an
//! `rel="enclosure"` link for every file so feed readers can pick a format.

use crate::index::{Listing, Publication};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};
use url::Url;

pub const FEED_FILE: &str = "feed.xml";
const FEED_TITLE: &str = "Recipe Press";

/// MIME type for an artifact extension.
pub fn mime_for(ext: &str) -> &'static str {
    match ext {
        "epub" => "application/epub+zip",
        "mobi" => "application/x-mobipocket-ebook",
        "azw3" => "application/vnd.amazon.ebook",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

fn write_text_element<W: Write>(
    w: &mut Writer<W>,
    name: &str,
    text: &str,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn write_entry<W: Write>(
    w: &mut Writer<W>,
    site: &Url,
    publication: &Publication,
    updated: DateTime<Utc>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    w.write_event(Event::Start(BytesStart::new("entry")))?;
    write_text_element(w, "title", publication.display_title())?;
    let id = format!(
        "{}#{}-{}",
        site,
        publication.recipe,
        publication.published.unwrap_or(updated).timestamp()
    );
    write_text_element(w, "id", &id)?;
    write_text_element(w, "updated", &rfc3339(publication.published.unwrap_or(updated)))?;
    write_text_element(w, "category", &publication.category)?;

    for file in &publication.files {
        let href = site.join(&file.file_name)?;
        let size = file.size.to_string();
        let mut link = BytesStart::new("link");
        link.push_attribute(("rel", "enclosure"));
        link.push_attribute(("href", href.as_str()));
        link.push_attribute(("type", mime_for(&file.ext)));
        link.push_attribute(("length", size.as_str()));
        link.push_attribute(("title", file.ext.as_str()));
        w.write_event(Event::Empty(link))?;
    }
    w.write_event(Event::End(BytesEnd::new("entry")))?;
    Ok(())
}

/// Render the Atom document for `listing`.
pub fn render_feed(listing: &Listing, site: &Url, updated: DateTime<Utc>) -> Result<String, Box<dyn Error + Send + Sync>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut feed = BytesStart::new("feed");
    feed.push_attribute(("xmlns", "http://www.w3.org/2005/Atom"));
    writer.write_event(Event::Start(feed))?;
    write_text_element(&mut writer, "title", FEED_TITLE)?;
    write_text_element(&mut writer, "id", site.as_str())?;
    write_text_element(&mut writer, "updated", &rfc3339(updated))?;

    let mut self_link = BytesStart::new("link");
    let self_href = site.join(FEED_FILE)?;
    self_link.push_attribute(("rel", "self"));
    self_link.push_attribute(("href", self_href.as_str()));
    writer.write_event(Event::Empty(self_link))?;

    let mut available: Vec<&Publication> = listing.publications().filter(|p| p.is_available()).collect();
    available.sort_by(|a, b| b.published.cmp(&a.published).then_with(|| a.recipe.cmp(&b.recipe)));
    for publication in available {
        write_entry(&mut writer, site, publication, updated)?;
    }

    writer.write_event(Event::End(BytesEnd::new("feed")))?;
    Ok(String::from_utf8(writer.into_inner())?)
}

/// Render and write `feed.xml` into `publish_dir`.
#[instrument(level = "info", skip_all, fields(publish_dir = %publish_dir.display()))]
pub async fn write_feed(
    listing: &Listing,
    site: &Url,
    updated: DateTime<Utc>,
    publish_dir: &Path,
) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
    let xml = render_feed(listing, site, updated)?;
    let path = publish_dir.join(FEED_FILE);
    tokio::fs::write(&path, xml).await?;
    info!(path = %path.display(), "Wrote feed");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{CategoryGroup, ListedFile};
    use chrono::TimeZone;

    fn publication(recipe: &str, day: Option<u32>, files: &[&str]) -> Publication {
        Publication {
            recipe: recipe.into(),
            name: recipe.into(),
            category: "news".into(),
            title: day.map(|d| format!("{recipe} <Jan {d}>")),
            published: day.map(|d| Utc.with_ymd_and_hms(2024, 1, d, 6, 0, 0).unwrap()),
            files: files
                .iter()
                .map(|f| ListedFile {
                    file_name: f.to_string(),
                    ext: f.rsplit('.').next().unwrap().to_string(),
                    size: 10,
                })
                .collect(),
        }
    }

    #[test]
    fn test_render_feed() {
        let listing = Listing {
            categories: vec![CategoryGroup {
                category: "news".into(),
                publications: vec![
                    publication("old", Some(1), &["old-2024-01-01.epub"]),
                    publication("new", Some(3), &["new-2024-01-03.epub", "new-2024-01-03.mobi"]),
                    publication("gone", None, &[]),
                ],
            }],
        };
        let site = Url::parse("https://example.com/news/").unwrap();
        let updated = Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap();
        let xml = render_feed(&listing, &site, updated).unwrap();

        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="utf-8"?>"#));
        assert!(xml.contains("<updated>2024-01-03T09:00:00Z</updated>"));
        assert!(xml.contains("new &lt;Jan 3&gt;"));
        assert!(xml.contains(r#"href="https://example.com/news/new-2024-01-03.mobi""#));
        assert!(xml.contains(r#"type="application/x-mobipocket-ebook""#));
        assert!(!xml.contains("gone"));
        assert!(xml.find("new-2024-01-03.epub").unwrap() < xml.find("old-2024-01-01.epub").unwrap());
        assert_eq!(xml.matches("<entry>").count(), 2);
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("epub"), "application/epub+zip");
        assert_eq!(mime_for("cbz"), "application/octet-stream");
    }
}
