use crate::config::IconConfig;
use crate::util::lock_recovering;
use futures::StreamExt;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

/// Gate-map entries whose fetches have all completed are pruned once the map
/// grows past this many URLs.
const IN_FLIGHT_PRUNE_THRESHOLD: usize = 256;

/// Errors that can occur while fetching a home page or an image.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request exceeded the configured timeout.
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// 2xx response with a zero-length body
    #[error("Empty response body")]
    EmptyBody,
    /// Response body exceeded the size limit
    #[error("Response too large (exceeds {0} bytes)")]
    TooLarge(usize),
}

/// A fetched (or cache-served) response body.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub bytes: Arc<[u8]>,
    pub content_type: Option<String>,
}

struct CachedResponse {
    body: FetchedBody,
    etag: Option<String>,
    last_modified: Option<String>,
    /// When this entry was last confirmed current (fresh 200 or a 304).
    revalidated_at: Instant,
}

struct FetcherInner {
    client: reqwest::Client,
    timeout: Duration,
    max_cached_body_bytes: usize,
    responses: Mutex<LruCache<String, CachedResponse>>,
    /// Per-URL gates serializing concurrent fetches of the same resource.
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// HTTP fetcher with response-level caching and in-flight deduplication.
///
/// `fetch_with_cache` gives repeated and concurrent fetches of the same URL
/// fetch-with-cache semantics: concurrent callers are serialized per URL and
/// reuse the winner's result, and repeat fetches revalidate with conditional
/// requests (`If-None-Match` / `If-Modified-Since`) instead of transferring
/// the body again. `fetch` is a plain one-shot GET with the same timeout and
/// size discipline, for callers that maintain their own cache.
///
/// Cheap to clone; clones share the client and both caches.
#[derive(Clone)]
pub struct CachedFetcher {
    inner: Arc<FetcherInner>,
}

impl CachedFetcher {
    /// Builds a fetcher from pipeline configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(config: &IconConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        let capacity = NonZeroUsize::new(config.response_cache_entries.max(1))
            .unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            inner: Arc::new(FetcherInner {
                client,
                timeout: Duration::from_secs(config.fetch_timeout_secs),
                max_cached_body_bytes: config.max_html_bytes,
                responses: Mutex::new(LruCache::new(capacity)),
                in_flight: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Fetches `url`, consulting and updating the response cache.
    ///
    /// Concurrent calls for the same URL issue a single full transfer: the
    /// first caller fetches while the rest wait, then reuse its result. A
    /// later call revalidates the cached entry with a conditional request
    /// and reuses the stored body on `304 Not Modified`.
    ///
    /// # Errors
    ///
    /// Any [`FetchError`]. A failed fetch leaves a previously cached entry
    /// in place but does not serve it — staleness policy belongs to callers.
    pub async fn fetch_with_cache(&self, url: &Url) -> Result<FetchedBody, FetchError> {
        let key = url.to_string();
        let started = Instant::now();
        let gate = self.gate_for(&key);
        let _guard = gate.lock().await;

        let validators = {
            let mut responses = lock_recovering(&self.inner.responses);
            match responses.get(&key) {
                // A fetch that completed while we waited on the gate is
                // current by construction — reuse it without any request.
                Some(entry) if entry.revalidated_at >= started => {
                    return Ok(entry.body.clone());
                }
                Some(entry) => (entry.etag.clone(), entry.last_modified.clone()),
                None => (None, None),
            }
        };

        let mut request = self.inner.client.get(url.clone());
        if let Some(etag) = &validators.0 {
            request = request.header(reqwest::header::IF_NONE_MATCH, etag.as_str());
        }
        if let Some(last_modified) = &validators.1 {
            request = request.header(reqwest::header::IF_MODIFIED_SINCE, last_modified.as_str());
        }

        let response = tokio::time::timeout(self.inner.timeout, request.send())
            .await
            .map_err(|_| FetchError::Timeout(self.inner.timeout.as_secs()))?
            .map_err(FetchError::Network)?;

        if response.status() == reqwest::StatusCode::NOT_MODIFIED {
            let mut responses = lock_recovering(&self.inner.responses);
            if let Some(entry) = responses.get_mut(&key) {
                entry.revalidated_at = Instant::now();
                tracing::debug!(url = %url, "Cached response revalidated (304)");
                return Ok(entry.body.clone());
            }
            // 304 without a cached entry (evicted between request and
            // response): nothing to serve.
            return Err(FetchError::EmptyBody);
        }

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let etag = header_value(&response, reqwest::header::ETAG);
        let last_modified = header_value(&response, reqwest::header::LAST_MODIFIED);
        let content_type = header_value(&response, reqwest::header::CONTENT_TYPE);

        let bytes = read_limited_bytes(response, self.inner.max_cached_body_bytes).await?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        let body = FetchedBody {
            bytes: bytes.into(),
            content_type,
        };

        let mut responses = lock_recovering(&self.inner.responses);
        responses.put(
            key,
            CachedResponse {
                body: body.clone(),
                etag,
                last_modified,
                revalidated_at: Instant::now(),
            },
        );

        Ok(body)
    }

    /// One-shot GET with the shared timeout and a caller-chosen size limit.
    ///
    /// Used by the image store, which keeps its own on-disk cache and
    /// accepts larger bodies than HTML pages.
    ///
    /// # Errors
    ///
    /// Any [`FetchError`].
    pub async fn fetch(
        &self,
        url: &Url,
        limit: usize,
    ) -> Result<(Vec<u8>, Option<String>), FetchError> {
        let response = tokio::time::timeout(
            self.inner.timeout,
            self.inner.client.get(url.clone()).send(),
        )
        .await
        .map_err(|_| FetchError::Timeout(self.inner.timeout.as_secs()))?
        .map_err(FetchError::Network)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let content_type = header_value(&response, reqwest::header::CONTENT_TYPE);
        let bytes = read_limited_bytes(response, limit).await?;
        if bytes.is_empty() {
            return Err(FetchError::EmptyBody);
        }

        Ok((bytes, content_type))
    }

    fn gate_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = lock_recovering(&self.inner.in_flight);
        if in_flight.len() > IN_FLIGHT_PRUNE_THRESHOLD {
            in_flight.retain(|_, gate| Arc::strong_count(gate) > 1);
        }
        in_flight.entry(key.to_owned()).or_default().clone()
    }
}

fn header_value(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Reads a response body with a size limit using stream-based reading.
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::TooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::TooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
