use scraper::{Html, Selector};
use url::Url;

/// An Open Graph image candidate extracted from `og:image*` meta tags.
///
/// Dimensions default to 0 when the page omits them or they fail to parse;
/// the selection policy treats such candidates as dimensionless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenGraphImage {
    /// Image URL, resolved against the page URL.
    pub url: String,
    /// HTTPS variant from `og:image:secure_url`, if present.
    pub secure_url: Option<String>,
    pub width: u32,
    pub height: u32,
}

/// Image-bearing metadata extracted from a home page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlMetadata {
    /// Open Graph image candidates in document order.
    pub open_graph_images: Vec<OpenGraphImage>,
    /// Twitter card image, if the page declares one.
    pub twitter_image_url: Option<String>,
}

/// Extracts Open Graph and Twitter card image metadata from HTML.
///
/// Tag handling follows how the tags appear in the wild rather than the
/// letter of the Open Graph and Twitter Card documents:
///
/// - `og:image` / `og:image:url` starts a new candidate; subsequent
///   `og:image:secure_url`, `og:image:width`, and `og:image:height` tags
///   attach to the most recently started candidate.
/// - Twitter tags are matched in both attribute positions (`name=` per the
///   card spec, `property=` as many sites emit them). First occurrence wins.
/// - Relative URLs are resolved against `base_url`; values that resolve to
///   a non-HTTP(S) URL are dropped.
///
/// Extraction never fails — malformed HTML yields whatever candidates the
/// parser can recover, and a page with no tags yields an empty result.
pub fn extract_metadata(html: &str, base_url: &Url) -> HtmlMetadata {
    let document = Html::parse_document(html);
    let mut metadata = HtmlMetadata::default();

    let Ok(selector) = Selector::parse("meta[content]") else {
        return metadata;
    };

    for element in document.select(&selector) {
        let Some(content) = element.value().attr("content") else {
            continue;
        };
        let Some(key) = element
            .value()
            .attr("property")
            .or_else(|| element.value().attr("name"))
        else {
            continue;
        };

        match key.to_ascii_lowercase().as_str() {
            "og:image" | "og:image:url" => {
                if let Some(url) = resolve_content_url(content, base_url) {
                    metadata.open_graph_images.push(OpenGraphImage {
                        url,
                        secure_url: None,
                        width: 0,
                        height: 0,
                    });
                }
            }
            "og:image:secure_url" => {
                if let Some(image) = metadata.open_graph_images.last_mut() {
                    image.secure_url = resolve_content_url(content, base_url);
                }
            }
            "og:image:width" => {
                if let Some(image) = metadata.open_graph_images.last_mut() {
                    image.width = parse_dimension(content);
                }
            }
            "og:image:height" => {
                if let Some(image) = metadata.open_graph_images.last_mut() {
                    image.height = parse_dimension(content);
                }
            }
            "twitter:image" | "twitter:image:src" => {
                if metadata.twitter_image_url.is_none() {
                    metadata.twitter_image_url = resolve_content_url(content, base_url);
                }
            }
            _ => {}
        }
    }

    metadata
}

fn parse_dimension(raw: &str) -> u32 {
    raw.trim().parse().unwrap_or(0)
}

/// Resolves a content attribute to an absolute HTTP(S) URL.
///
/// Returns `None` for empty values, unresolvable hrefs, and anything that
/// resolves to a non-web scheme (`data:`, `javascript:`, ...).
fn resolve_content_url(raw: &str, base_url: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    match base_url.join(raw) {
        Ok(resolved) if matches!(resolved.scheme(), "http" | "https") => {
            Some(resolved.to_string())
        }
        _ => None,
    }
}
