//! Feed icon discovery and caching pipeline for RSS readers.
//!
//! Given a feed, resolve its icon image: use the feed's own icon URL when it
//! has one, otherwise scrape the feed's home page for Open Graph / Twitter
//! card images, cache the discovered home-page → icon-URL mapping for the
//! life of the process, and serve image bytes through a memory + disk cache.
//!
//! The public surface is poll-based and never blocks: a lookup returns the
//! icon if it is currently available, and otherwise kicks off the missing
//! background work (discovery, download) and returns `None`. Subscribe to
//! [`IconEvent`]s to learn when a re-poll will succeed. Nothing in the
//! pipeline surfaces errors to lookup callers — icon resolution is a
//! best-effort enhancement, and continued absence is the only failure
//! signal.
//!
//! # Example
//!
//! ```no_run
//! use feedicon::{Feed, FeedIconResolver, IconConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let resolver = FeedIconResolver::new(&IconConfig::default())?;
//! let mut events = resolver.subscribe();
//!
//! let feed = Feed {
//!     home_page_url: Some("https://example.com/".to_owned()),
//!     ..Feed::default()
//! };
//!
//! if let Some(icon) = resolver.icon_for_feed(&feed) {
//!     // render icon bytes
//! } else {
//!     // discovery is running; re-poll after the next event
//!     let _ = events.recv().await;
//!     let _icon = resolver.icon_for_feed(&feed);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod events;
pub mod feed;
pub mod html;
pub mod icons;
pub mod images;
pub mod util;

pub use config::{ConfigError, IconConfig};
pub use events::IconEvent;
pub use feed::{Feed, FeedParseError};
pub use icons::{FeedIconResolver, IconUrlCache};
pub use images::{CacheStats, CachedFetcher, FetchError, ImageData, ImageStore};
