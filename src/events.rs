//! Availability notifications emitted by the pipeline.
//!
//! Lookups are non-blocking snapshots: a miss means "not ready yet", and the
//! caller is expected to re-poll after one of these events rather than wait.
//! A broadcast channel is used so any number of observers (icon views, a
//! timeline, tests) can subscribe independently; a lagging or dropped
//! receiver never blocks the pipeline.

use tokio::sync::broadcast;

/// Buffered events per receiver before the oldest are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Signals that an icon that was previously absent may now resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconEvent {
    /// Raw image bytes for `url` just landed in the in-memory cache.
    /// A lookup for this URL will now succeed.
    ImageAvailable { url: String },
    /// Home-page discovery mapped `home_page_url` to `icon_url`.
    /// The image itself may still be downloading.
    IconDiscovered {
        home_page_url: String,
        icon_url: String,
    },
}

pub(crate) fn channel() -> broadcast::Sender<IconEvent> {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}
