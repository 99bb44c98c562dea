//! Icon resolution: the decision procedure, its URL cache, and home-page
//! discovery.
//!
//! The path for any feed is a strict priority order — direct icon URL,
//! then cached discovered URL, then trigger-discovery-and-return-absent —
//! implemented by [`FeedIconResolver`]. Discovery scrapes the feed's home
//! page for Open Graph / Twitter card images and records the winner in
//! [`IconUrlCache`] for the life of the process.

mod cache;
mod discovery;
mod resolver;

pub use cache::IconUrlCache;
pub use discovery::best_open_graph_image;
pub use resolver::FeedIconResolver;
