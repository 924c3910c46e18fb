//! HTML rendering for the download page.
//!
//! [`render_listing`] produces a nested-list fragment mirroring the
//! category → publication → file hierarchy. [`render_page`] substitutes it,
//! together with the build duration and refresh time, into the page
//! template. Recognised placeholders:
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{listing}` | the listing fragment |
//! | `{elapsed}` | build duration, e.g. `4m 12s` |
//! | `{refreshed_ts}` | refresh time in Unix milliseconds |
//! | `{refreshed_dt}` | refresh time as RFC 3339 |

use crate::index::{Listing, Publication};
use crate::utils::{human_size, upcase};
use chrono::{DateTime, SecondsFormat, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::fmt::Write;
use std::time::Duration;

fn render_publication(out: &mut String, publication: &Publication) {
    let title = encode_text(publication.display_title());
    if !publication.is_available() {
        let _ = writeln!(
            out,
            r#"<li class="not-available"><span class="title">{}</span> <span class="status">Not available</span></li>"#,
            encode_text(&publication.name)
        );
        return;
    }

    let _ = write!(out, r#"<li><span class="title">{title}</span>"#);
    if let Some(published) = publication.published {
        let _ = write!(
            out,
            r#" <span class="pub-date" data-pub-date="{}">{}</span>"#,
            published.timestamp_millis(),
            published.format("%Y-%m-%d")
        );
    }
    let links = publication
        .files
        .iter()
        .map(|file| {
            format!(
                r#"<a href="{}">{}<span class="file-size">{}</span></a>"#,
                encode_double_quoted_attribute(&file.file_name),
                encode_text(&file.ext),
                human_size(file.size)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, r#"<div class="downloads">{links}</div></li>"#);
}

/// Nested list markup for the whole listing.
pub fn render_listing(listing: &Listing) -> String {
    let mut out = String::new();
    for group in &listing.categories {
        let category = encode_double_quoted_attribute(&group.category);
        let _ = writeln!(out, r#"<div class="category-container" data-category="{category}">"#);
        let _ = writeln!(
            out,
            r#"<h2 class="category">{}</h2>"#,
            encode_text(&upcase(&group.category))
        );
        out.push_str("<ol class=\"publications\">\n");
        for publication in &group.publications {
            render_publication(&mut out, publication);
        }
        out.push_str("</ol>\n</div>\n");
    }
    out
}

/// Fill the page template.
pub fn render_page(template: &str, listing_html: &str, elapsed: Duration, refreshed: DateTime<Utc>) -> String {
    template
        .replace("{elapsed}", &crate::utils::format_elapsed(elapsed))
        .replace("{refreshed_ts}", &refreshed.timestamp_millis().to_string())
        .replace("{refreshed_dt}", &refreshed.to_rfc3339_opts(SecondsFormat::Secs, true))
        .replace("{listing}", listing_html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{CategoryGroup, ListedFile};
    use chrono::TimeZone;

    fn listing() -> Listing {
        Listing {
            categories: vec![CategoryGroup {
                category: "news".into(),
                publications: vec![
                    Publication {
                        recipe: "guardian".into(),
                        name: "The Guardian".into(),
                        category: "news".into(),
                        title: Some("The Guardian: Jan 2 & more".into()),
                        published: Some(Utc.with_ymd_and_hms(2024, 1, 2, 6, 0, 0).unwrap()),
                        files: vec![
                            ListedFile {
                                file_name: "guardian-2024-01-02.epub".into(),
                                ext: "epub".into(),
                                size: 1_234_567,
                            },
                            ListedFile {
                                file_name: "guardian-2024-01-02.azw3".into(),
                                ext: "azw3".into(),
                                size: 2_000,
                            },
                        ],
                    },
                    Publication {
                        recipe: "ft".into(),
                        name: "Financial Times".into(),
                        category: "news".into(),
                        title: None,
                        published: None,
                        files: Vec::new(),
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_render_listing() {
        let html = render_listing(&listing());
        assert!(html.contains(r#"<h2 class="category">News</h2>"#));
        assert!(html.contains("The Guardian: Jan 2 &amp; more"));
        assert!(html.contains(
            r#"<a href="guardian-2024-01-02.epub">epub<span class="file-size">1.2 MB</span></a>, <a href="guardian-2024-01-02.azw3">azw3<span class="file-size">2.0 kB</span></a>"#
        ));
        assert!(html.contains(
            r#"<li class="not-available"><span class="title">Financial Times</span> <span class="status">Not available</span></li>"#
        ));
        let epub = html.find("guardian-2024-01-02.epub").unwrap();
        let azw3 = html.find("guardian-2024-01-02.azw3").unwrap();
        assert!(epub < azw3);
    }

    #[test]
    fn test_render_page_fills_placeholders() {
        let refreshed = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap();
        let page = render_page(
            "<p>{refreshed_dt} ({refreshed_ts}) in {elapsed}</p><main>{listing}</main>",
            "<ol></ol>",
            Duration::from_secs(75),
            refreshed,
        );
        assert_eq!(
            page,
            "<p>2024-01-02T08:00:00Z (1704182400000) in 1m 15s</p><main><ol></ol></main>"
        );
    }
}
