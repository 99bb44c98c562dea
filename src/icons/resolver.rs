use crate::config::IconConfig;
use crate::events::{self, IconEvent};
use crate::feed::Feed;
use crate::icons::cache::IconUrlCache;
use crate::icons::discovery;
use crate::images::fetch::{CachedFetcher, FetchError};
use crate::images::{ImageData, ImageStore};
use crate::util::{lock_recovering, UrlPolicy};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

struct ResolverInner {
    images: ImageStore,
    fetcher: CachedFetcher,
    icon_urls: IconUrlCache,
    /// Home pages with a discovery task currently running.
    pending_discoveries: Mutex<HashSet<String>>,
    policy: UrlPolicy,
    events: broadcast::Sender<IconEvent>,
}

/// Resolves a feed to its icon image.
///
/// Resolution follows a strict priority order:
///
/// 1. the feed's own icon URL, when it has one — fetched directly, no
///    discovery involved;
/// 2. an icon URL previously discovered for the feed's home page;
/// 3. nothing yet — home-page discovery is kicked off in the background
///    and the call returns `None`.
///
/// Every lookup is a non-blocking snapshot: `None` means "not ready yet",
/// not "no icon exists". Subscribe to [`IconEvent`]s and re-poll when
/// discovery completes or image bytes arrive. Failures anywhere in the
/// pipeline are logged and swallowed; continued absence is the only
/// observable failure signal.
///
/// Cheap to clone; clones share every cache and the event channel. Lookup
/// methods must be called from within a Tokio runtime, since misses spawn
/// background work.
#[derive(Clone)]
pub struct FeedIconResolver {
    inner: Arc<ResolverInner>,
}

impl FeedIconResolver {
    /// Builds the full pipeline — fetcher, image store, icon URL cache, and
    /// event channel — from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the HTTP client cannot be built.
    pub fn new(config: &IconConfig) -> Result<Self, FetchError> {
        let events = events::channel();
        let fetcher = CachedFetcher::new(config)?;
        let images = ImageStore::new(config, fetcher.clone(), events.clone());

        Ok(Self {
            inner: Arc::new(ResolverInner {
                images,
                fetcher,
                icon_urls: IconUrlCache::new(),
                pending_discoveries: Mutex::new(HashSet::new()),
                policy: UrlPolicy {
                    allow_private_networks: config.allow_private_networks,
                },
                events,
            }),
        })
    }

    /// Subscribes to availability events. Each receiver sees every event
    /// emitted after the call.
    pub fn subscribe(&self) -> broadcast::Receiver<IconEvent> {
        self.inner.events.subscribe()
    }

    /// The home-page → icon-URL cache, for inspection and test resets.
    pub fn icon_url_cache(&self) -> &IconUrlCache {
        &self.inner.icon_urls
    }

    /// The underlying image store.
    pub fn image_store(&self) -> &ImageStore {
        &self.inner.images
    }

    /// Returns the feed's icon if it is currently available.
    pub fn icon_for_feed(&self, feed: &Feed) -> Option<ImageData> {
        if let Some(icon_url) = &feed.icon_url {
            // The feed supplies a stable icon URL; no discovery or URL
            // caching applies on this path.
            return self.icon_for_url(icon_url);
        }

        if let Some(home_page_url) = &feed.home_page_url {
            return self.icon_for_home_page(home_page_url);
        }

        None
    }

    /// Returns the icon for a home page if one has been discovered and
    /// downloaded; otherwise triggers discovery and returns `None`.
    pub fn icon_for_home_page(&self, home_page_url: &str) -> Option<ImageData> {
        if let Some(icon_url) = self.inner.icon_urls.get(home_page_url) {
            return self.icon_for_url(&icon_url);
        }

        self.spawn_discovery(home_page_url);
        None
    }

    /// Returns the image at `url` if it is in memory. Pure passthrough to
    /// the image store, which owns all byte-level caching.
    pub fn icon_for_url(&self, url: &str) -> Option<ImageData> {
        self.inner.images.image_for_url(url)
    }

    /// Starts a background discovery for `home_page_url` unless one is
    /// already in flight.
    fn spawn_discovery(&self, home_page_url: &str) {
        if !self.pending().insert(home_page_url.to_owned()) {
            return;
        }

        let resolver = self.clone();
        let home_page_url = home_page_url.to_owned();
        tokio::spawn(async move {
            let discovered = discovery::discover_icon_url(
                &resolver.inner.fetcher,
                &home_page_url,
                resolver.inner.policy,
            )
            .await;

            if let Some(icon_url) = discovered {
                resolver.inner.icon_urls.insert(&home_page_url, &icon_url);
                tracing::debug!(
                    home_page = %home_page_url,
                    icon = %icon_url,
                    "Icon url discovered"
                );

                // Start the image download now so the caller's next poll
                // can succeed.
                resolver.inner.images.image_for_url(&icon_url);

                let _ = resolver.inner.events.send(IconEvent::IconDiscovered {
                    home_page_url: home_page_url.clone(),
                    icon_url,
                });
            }

            // Cleared last: a failed discovery becomes retryable only once
            // the task is fully done, and a successful one is visible in the
            // URL cache before re-triggering is possible.
            resolver.pending().remove(&home_page_url);
        });
    }

    fn pending(&self) -> MutexGuard<'_, HashSet<String>> {
        lock_recovering(&self.inner.pending_discoveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG_BYTES: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
    ];

    fn test_resolver(cache_dir: &std::path::Path) -> FeedIconResolver {
        let config = IconConfig {
            cache_dir: cache_dir.to_path_buf(),
            allow_private_networks: true,
            ..IconConfig::default()
        };
        FeedIconResolver::new(&config).unwrap()
    }

    async fn next_event(receiver: &mut broadcast::Receiver<IconEvent>) -> IconEvent {
        tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn mount_icon(mock_server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/icon.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(PNG_BYTES)
                    .insert_header("Content-Type", "image/png"),
            )
            .mount(mock_server)
            .await;
    }

    #[tokio::test]
    async fn test_feed_without_urls_has_no_icon() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());

        assert!(resolver.icon_for_feed(&Feed::default()).is_none());
        assert!(resolver.icon_url_cache().is_empty());
    }

    #[tokio::test]
    async fn test_direct_icon_url_never_triggers_discovery() {
        let mock_server = MockServer::start().await;
        mount_icon(&mock_server).await;

        // Any hit on the home page would trip this
        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .expect(0)
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());
        let mut events = resolver.subscribe();

        let feed = Feed {
            title: Some("Example".to_owned()),
            icon_url: Some(format!("{}/icon.png", mock_server.uri())),
            home_page_url: Some(format!("{}/home", mock_server.uri())),
        };

        assert!(resolver.icon_for_feed(&feed).is_none());
        next_event(&mut events).await;

        let data = resolver.icon_for_feed(&feed).expect("icon downloaded");
        assert_eq!(&data[..], PNG_BYTES);
        assert!(resolver.icon_url_cache().is_empty());
    }

    #[tokio::test]
    async fn test_first_home_page_lookup_starts_exactly_one_discovery() {
        let mock_server = MockServer::start().await;
        mount_icon(&mock_server).await;

        let html = r#"<meta property="og:image" content="/icon.png">"#;
        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(html)
                    .insert_header("Content-Type", "text/html")
                    .set_delay(Duration::from_millis(200)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());
        let mut events = resolver.subscribe();
        let home = format!("{}/home", mock_server.uri());

        // Repeated polls while discovery is in flight must not re-trigger it
        assert!(resolver.icon_for_home_page(&home).is_none());
        assert!(resolver.icon_for_home_page(&home).is_none());
        assert!(resolver.icon_for_home_page(&home).is_none());

        let event = next_event(&mut events).await;
        assert_eq!(
            event,
            IconEvent::IconDiscovered {
                home_page_url: home.clone(),
                icon_url: format!("{}/icon.png", mock_server.uri()),
            }
        );
        assert_eq!(
            resolver.icon_url_cache().get(&home).as_deref(),
            Some(format!("{}/icon.png", mock_server.uri()).as_str())
        );
    }

    #[tokio::test]
    async fn test_cached_home_page_never_rediscovers() {
        let mock_server = MockServer::start().await;
        mount_icon(&mock_server).await;

        let html = r#"<meta property="og:image" content="/icon.png">"#;
        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(html)
                    .insert_header("Content-Type", "text/html"),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());
        let mut events = resolver.subscribe();
        let home = format!("{}/home", mock_server.uri());

        assert!(resolver.icon_for_home_page(&home).is_none());
        next_event(&mut events).await; // IconDiscovered
        next_event(&mut events).await; // ImageAvailable

        for _ in 0..5 {
            let data = resolver
                .icon_for_home_page(&home)
                .expect("icon available after discovery");
            assert_eq!(&data[..], PNG_BYTES);
        }
        // expect(1) on the home mock verifies no rediscovery on drop
    }

    #[tokio::test]
    async fn test_failed_discovery_is_retried_on_next_lookup() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());
        let home = format!("{}/home", mock_server.uri());

        assert!(resolver.icon_for_home_page(&home).is_none());
        wait_for_idle(&resolver, &home).await;
        assert!(resolver.icon_url_cache().is_empty());

        // Absence was not cached — a later lookup attempts discovery again
        assert!(resolver.icon_for_home_page(&home).is_none());
        wait_for_idle(&resolver, &home).await;
        assert!(resolver.icon_url_cache().is_empty());
    }

    #[tokio::test]
    async fn test_iconless_page_is_not_cached_negatively() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body>No metadata here</body></html>")
                    .insert_header("Content-Type", "text/html"),
            )
            .expect(2)
            .mount(&mock_server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());
        let home = format!("{}/home", mock_server.uri());

        assert!(resolver.icon_for_home_page(&home).is_none());
        wait_for_idle(&resolver, &home).await;
        assert!(resolver.icon_url_cache().is_empty());

        assert!(resolver.icon_for_home_page(&home).is_none());
        wait_for_idle(&resolver, &home).await;
    }

    #[tokio::test]
    async fn test_malformed_home_page_url_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = test_resolver(dir.path());

        assert!(resolver.icon_for_home_page("not a url").is_none());
        wait_for_idle(&resolver, "not a url").await;
        assert!(resolver.icon_url_cache().is_empty());
    }

    /// Waits for the discovery task for `home` to leave the pending set.
    async fn wait_for_idle(resolver: &FeedIconResolver, home: &str) {
        for _ in 0..100 {
            if !resolver.pending().contains(home) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("discovery for {home} never finished");
    }
}
