use crate::html::{self, OpenGraphImage};
use crate::images::fetch::CachedFetcher;
use crate::util::{validate_url, UrlPolicy};

/// Attempts to discover an icon URL for a home page.
///
/// Fetches the page through the caching fetch layer, extracts image
/// metadata, and picks a winner: the best Open Graph image takes strict
/// priority, the Twitter card image is the fallback.
///
/// Failures never propagate. A malformed or out-of-policy URL is a silent
/// no-op; a fetch failure (transport error, non-2xx status, empty body) is
/// logged at warning level. Either way the result is `None`, and nothing
/// records the failure — the next trigger for this page starts a fresh
/// attempt.
pub(crate) async fn discover_icon_url(
    fetcher: &CachedFetcher,
    home_page_url: &str,
    policy: UrlPolicy,
) -> Option<String> {
    let url = validate_url(home_page_url, policy).ok()?;

    let body = match fetcher.fetch_with_cache(&url).await {
        Ok(body) => body,
        Err(error) => {
            tracing::warn!(url = %home_page_url, error = %error, "Error finding icon url");
            return None;
        }
    };

    let html_text = String::from_utf8_lossy(&body.bytes);
    let metadata = html::extract_metadata(&html_text, &url);

    if let Some(image) = best_open_graph_image(&metadata.open_graph_images) {
        return Some(image.secure_url.clone().unwrap_or_else(|| image.url.clone()));
    }

    metadata.twitter_image_url
}

/// Picks the best Open Graph image from candidates in encounter order.
///
/// The first candidate is adopted unconditionally; a later candidate
/// replaces the current best only when BOTH its height and its width are
/// strictly greater. This is deliberately not an area comparison — a very
/// wide, very short banner never displaces a squarer image that it merely
/// out-areas.
pub fn best_open_graph_image(images: &[OpenGraphImage]) -> Option<&OpenGraphImage> {
    let mut best: Option<&OpenGraphImage> = None;

    for image in images {
        match best {
            None => best = Some(image),
            Some(current) if image.height > current.height && image.width > current.width => {
                best = Some(image);
            }
            Some(_) => {}
        }
    }

    best
}
