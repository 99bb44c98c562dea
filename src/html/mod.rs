//! HTML metadata extraction.
//!
//! Home pages are parsed with the `scraper` crate; the only structure this
//! pipeline cares about is image-bearing metadata — Open Graph image tags
//! (with their width/height/secure-URL companions) and the Twitter card
//! image fallback.

mod metadata;

pub use metadata::{extract_metadata, HtmlMetadata, OpenGraphImage};
