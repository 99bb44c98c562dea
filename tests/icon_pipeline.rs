//! End-to-end pipeline tests: home-page discovery through image download,
//! driven against a mock HTTP server.

use feedicon::{Feed, FeedIconResolver, IconConfig, IconEvent};
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D,
];

fn resolver_with_cache(cache_dir: &Path) -> FeedIconResolver {
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

async fn mount_site(mock_server: &MockServer) {
    let html = r#"<html><head>
        <meta property="og:image" content="/banner-small.png">
        <meta property="og:image:width" content="100">
        <meta property="og:image:height" content="100">
        <meta property="og:image" content="/icon.png">
        <meta property="og:image:width" content="512">
        <meta property="og:image:height" content="512">
        <meta name="twitter:image" content="/twitter.png">
    </head><body>Welcome</body></html>"#;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(html)
                .insert_header("Content-Type", "text/html"),
        )
        .mount(mock_server)
        .await;

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
async fn home_page_discovery_resolves_an_icon_end_to_end() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;

    let cache = tempfile::tempdir().unwrap();
    let resolver = resolver_with_cache(cache.path());
    let mut events = resolver.subscribe();

    let home = format!("{}/", mock_server.uri());
    let feed = Feed {
        title: Some("Example".to_owned()),
        icon_url: None,
        home_page_url: Some(home.clone()),
    };

    // Not ready yet: discovery has only just been triggered
    assert!(resolver.icon_for_feed(&feed).is_none());

    // Discovery picks the dominating Open Graph image over the smaller one
    // and over the Twitter card
    let expected_icon = format!("{}/icon.png", mock_server.uri());
    assert_eq!(
        next_event(&mut events).await,
        IconEvent::IconDiscovered {
            home_page_url: home.clone(),
            icon_url: expected_icon.clone(),
        }
    );

    // The pipeline downloads the icon on its own after discovery
    assert_eq!(
        next_event(&mut events).await,
        IconEvent::ImageAvailable {
            url: expected_icon.clone(),
        }
    );

    let icon = resolver.icon_for_feed(&feed).expect("icon resolved");
    assert_eq!(&icon[..], PNG_BYTES);

    // The mapping is cached and the bytes reached the disk store
    assert_eq!(
        resolver.icon_url_cache().get(&home),
        Some(expected_icon.clone())
    );
    let stats = resolver.image_store().cache_stats().unwrap();
    assert_eq!(stats.total_entries, 1);
}

#[tokio::test]
async fn direct_icon_url_bypasses_the_home_page_entirely() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/icon.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(PNG_BYTES)
                .insert_header("Content-Type", "image/png"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // The home page must never be requested when a direct icon URL exists
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let cache = tempfile::tempdir().unwrap();
    let resolver = resolver_with_cache(cache.path());
    let mut events = resolver.subscribe();

    let feed = Feed {
        title: None,
        icon_url: Some(format!("{}/icon.png", mock_server.uri())),
        home_page_url: Some(format!("{}/", mock_server.uri())),
    };

    assert!(resolver.icon_for_feed(&feed).is_none());
    next_event(&mut events).await;

    let icon = resolver.icon_for_feed(&feed).expect("icon resolved");
    assert_eq!(&icon[..], PNG_BYTES);
    assert!(resolver.icon_url_cache().is_empty());
}

#[tokio::test]
async fn downloaded_icons_survive_a_process_restart() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;

    let cache = tempfile::tempdir().unwrap();
    let home = format!("{}/", mock_server.uri());
    let feed = Feed {
        title: None,
        icon_url: None,
        home_page_url: Some(home.clone()),
    };

    // First "process": discover and download
    {
        let resolver = resolver_with_cache(cache.path());
        let mut events = resolver.subscribe();
        assert!(resolver.icon_for_feed(&feed).is_none());
        next_event(&mut events).await; // IconDiscovered
        next_event(&mut events).await; // ImageAvailable
        assert!(resolver.icon_for_feed(&feed).is_some());
    }

    // Second "process": the URL cache is gone (process-lifetime), so
    // discovery re-runs, but the image itself is served from disk
    let resolver = resolver_with_cache(cache.path());
    let mut events = resolver.subscribe();

    assert!(resolver.icon_for_feed(&feed).is_none());
    next_event(&mut events).await; // IconDiscovered
    next_event(&mut events).await; // ImageAvailable (from disk)

    let icon = resolver.icon_for_feed(&feed).expect("icon resolved");
    assert_eq!(&icon[..], PNG_BYTES);

    let stats = resolver.image_store().cache_stats().unwrap();
    assert_eq!(stats.total_entries, 1);
}

#[tokio::test]
async fn feeds_without_any_urls_resolve_to_nothing() {
    let cache = tempfile::tempdir().unwrap();
    let resolver = resolver_with_cache(cache.path());

    assert!(resolver.icon_for_feed(&Feed::default()).is_none());
    assert!(resolver.icon_url_cache().is_empty());
    assert_eq!(resolver.image_store().cache_stats().unwrap().total_entries, 0);
}
