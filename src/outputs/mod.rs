//! Output generation for the publish directory.
//!
//! # Submodules
//!
//! - [`json`]: writes `index.json` (next build's cache) and `last_run.json`
//! - [`html`]: renders the download listing and fills the `index.html` template
//! - [`feed`]: writes an Atom feed of the latest artifacts
//!
//! # Output Structure
//!
//! ```text
//! public/
//! ├── economist-2023-04-15.epub
//! ├── economist-2023-04-15.azw3
//! ├── index.json
//! ├── last_run.json
//! ├── index.html
//! └── feed.xml
//! ```

pub mod feed;
pub mod html;
pub mod json;
