//! The feed record the pipeline resolves icons for.
//!
//! Feed identity and lifecycle belong to the surrounding application; the
//! pipeline only reads the two URL fields. The XML adapter exists for
//! callers (and the CLI) that start from a raw feed document rather than an
//! already-materialized record.

use thiserror::Error;

/// Errors that can occur while building a [`Feed`] from feed XML.
#[derive(Debug, Error)]
pub enum FeedParseError {
    /// The bytes could not be parsed as RSS, Atom, or JSON Feed.
    #[error("Feed could not be parsed: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
}

/// A feed, as seen by the icon pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    /// Feed title, used only for logging and display.
    pub title: Option<String>,
    /// Direct icon URL supplied by the feed itself. When present, icon
    /// resolution uses it unconditionally and never consults the home page.
    pub icon_url: Option<String>,
    /// URL of the feed's associated website, scraped for image metadata
    /// when no direct icon URL exists.
    pub home_page_url: Option<String>,
}

impl Feed {
    /// Builds a `Feed` from a raw feed document.
    ///
    /// The feed's own icon is preferred over its logo for `icon_url`.
    /// `home_page_url` is the first link that is not the feed document
    /// itself (`feed_url` is used to recognize and skip self links).
    ///
    /// # Errors
    ///
    /// Returns [`FeedParseError`] if the bytes are not a parseable feed.
    pub fn from_feed_xml(bytes: &[u8], feed_url: &str) -> Result<Self, FeedParseError> {
        let parsed = feed_rs::parser::parse(bytes)?;

        let title = parsed.title.map(|t| t.content);
        let icon_url = parsed
            .icon
            .map(|image| image.uri)
            .or_else(|| parsed.logo.map(|image| image.uri));

        let home_page_url = parsed
            .links
            .iter()
            .find(|link| link.href != feed_url)
            .or_else(|| parsed.links.first())
            .map(|link| link.href.clone())
            .filter(|href| href != feed_url);

        Ok(Self {
            title,
            icon_url,
            home_page_url,
        })
    }
}
