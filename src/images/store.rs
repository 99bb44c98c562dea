use crate::config::IconConfig;
use crate::events::IconEvent;
use crate::images::fetch::{CachedFetcher, FetchError};
use crate::util::lock_recovering;
use chrono::{DateTime, Utc};
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;
use url::Url;

/// Raw image bytes, shared out of the memory cache by refcount clone.
pub type ImageData = Arc<[u8]>;

/// Errors that can occur while loading an image into the store.
///
/// Loads run in background tasks; these errors are logged and swallowed,
/// never surfaced to lookup callers.
#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("Invalid image URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Fetched bytes carry no known image magic and no image content type.
    #[error("Response is not a recognized image")]
    NotAnImage,
}

/// Aggregate statistics for the on-disk image cache.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: u64,
    pub total_size_bytes: u64,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

struct StoreInner {
    dir: PathBuf,
    max_image_bytes: usize,
    memory: Mutex<LruCache<String, ImageData>>,
    /// URLs with a load task currently running.
    pending: Mutex<HashSet<String>>,
    fetcher: CachedFetcher,
    events: broadcast::Sender<IconEvent>,
}

/// Fetch-and-cache store for raw image bytes, keyed by URL.
///
/// Lookups are synchronous snapshots of the in-memory cache. A miss
/// schedules a background load — disk file first, then network — and the
/// store emits [`IconEvent::ImageAvailable`] once the bytes land in memory,
/// so callers re-poll instead of blocking. Downloaded images persist as
/// content-addressed files (`sha256(url)`) in the cache directory and
/// survive across processes.
///
/// Cheap to clone; clones share all caches.
#[derive(Clone)]
pub struct ImageStore {
    inner: Arc<StoreInner>,
}

impl ImageStore {
    pub fn new(
        config: &IconConfig,
        fetcher: CachedFetcher,
        events: broadcast::Sender<IconEvent>,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.memory_cache_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(StoreInner {
                dir: config.cache_dir.clone(),
                max_image_bytes: config.max_image_bytes,
                memory: Mutex::new(LruCache::new(capacity)),
                pending: Mutex::new(HashSet::new()),
                fetcher,
                events,
            }),
        }
    }

    /// Returns the image for `url` if it is already in memory.
    ///
    /// On a miss, returns `None` immediately and schedules a background load
    /// (at most one per URL at a time); never blocks on disk or network.
    /// Must be called from within a Tokio runtime.
    pub fn image_for_url(&self, url: &str) -> Option<ImageData> {
        {
            let mut memory = lock_recovering(&self.inner.memory);
            if let Some(data) = memory.get(url) {
                return Some(Arc::clone(data));
            }
        }

        {
            let mut pending = lock_recovering(&self.inner.pending);
            if !pending.insert(url.to_owned()) {
                // A load for this URL is already running
                return None;
            }
        }

        let store = self.clone();
        let url = url.to_owned();
        tokio::spawn(async move {
            if let Err(error) = store.load(&url).await {
                tracing::warn!(url = %url, error = %error, "Image load failed");
            }
            lock_recovering(&store.inner.pending).remove(&url);
        });

        None
    }

    /// Loads `url` from disk or network into the memory cache.
    async fn load(&self, url: &str) -> Result<(), ImageLoadError> {
        let path = self.cache_path(url);

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                tracing::debug!(url = %url, path = %path.display(), "Image served from disk cache");
                self.publish(url, bytes);
                return Ok(());
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => return Err(ImageLoadError::Io(error)),
        }

        let parsed = Url::parse(url)?;
        let (bytes, content_type) = self
            .inner
            .fetcher
            .fetch(&parsed, self.inner.max_image_bytes)
            .await?;

        if !looks_like_image(&bytes, content_type.as_deref()) {
            return Err(ImageLoadError::NotAnImage);
        }

        tokio::fs::create_dir_all(&self.inner.dir).await?;
        tokio::fs::write(&path, &bytes).await?;
        tracing::debug!(url = %url, bytes = bytes.len(), "Image downloaded and cached");

        self.publish(url, bytes);
        Ok(())
    }

    /// Inserts bytes into the memory cache and announces their availability.
    fn publish(&self, url: &str, bytes: Vec<u8>) {
        let data: ImageData = bytes.into();
        lock_recovering(&self.inner.memory).put(url.to_owned(), data);
        let _ = self.inner.events.send(IconEvent::ImageAvailable {
            url: url.to_owned(),
        });
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        let hash = Sha256::digest(url.as_bytes());
        self.inner.dir.join(format!("{:x}", hash))
    }

    /// Scans the disk cache directory and computes aggregate statistics.
    ///
    /// A missing directory counts as an empty cache.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the directory exists but cannot
    /// be read.
    pub fn cache_stats(&self) -> std::io::Result<CacheStats> {
        let mut stats = CacheStats {
            total_entries: 0,
            total_size_bytes: 0,
            oldest_entry: None,
            newest_entry: None,
        };

        let entries = match std::fs::read_dir(&self.inner.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(error) => return Err(error),
        };

        for entry in entries {
            let metadata = entry?.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            stats.total_entries += 1;
            stats.total_size_bytes += metadata.len();
            if let Ok(modified) = metadata.modified() {
                let modified: DateTime<Utc> = modified.into();
                if stats.oldest_entry.is_none_or(|oldest| modified < oldest) {
                    stats.oldest_entry = Some(modified);
                }
                if stats.newest_entry.is_none_or(|newest| modified > newest) {
                    stats.newest_entry = Some(modified);
                }
            }
        }

        Ok(stats)
    }
}

/// Sniffs image magic bytes, falling back to the declared content type.
///
/// Favicon and CDN servers routinely mislabel content types, so the bytes
/// are authoritative where a known signature exists; the content type only
/// rescues formats without one (notably SVG).
fn looks_like_image(data: &[u8], content_type: Option<&str>) -> bool {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) // PNG
        || data.starts_with(&[0xFF, 0xD8, 0xFF]) // JPEG
        || data.starts_with(b"GIF8")
        || (data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP")
        || data.starts_with(&[0x00, 0x00, 0x01, 0x00]) // ICO
        || data.starts_with(b"BM")
    {
        return true;
    }

    content_type.is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("image/"))
}
