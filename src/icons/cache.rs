use crate::util::lock_recovering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Process-lifetime map from home-page URL to discovered icon URL.
///
/// Keys are home-page URL strings exactly as provided — no canonicalization
/// is performed, so two spellings of one page are distinct entries. Entries
/// are never expired or evicted; a repeat discovery for the same key
/// overwrites (last-write-wins). The map dies with the process — icon URL
/// mappings are cheap to rediscover, and the image bytes themselves persist
/// in the image store's disk cache.
///
/// Reads come from lookup paths while writes come from background discovery
/// tasks, so access is mutex-guarded; no lock is held across an await.
#[derive(Debug, Default)]
pub struct IconUrlCache {
    entries: Mutex<HashMap<String, String>>,
}

impl IconUrlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached icon URL for a home page, if discovery has
    /// recorded one.
    pub fn get(&self, home_page_url: &str) -> Option<String> {
        self.lock().get(home_page_url).cloned()
    }

    /// Records a discovered icon URL, replacing any previous entry.
    pub fn insert(&self, home_page_url: &str, icon_url: &str) {
        self.lock()
            .insert(home_page_url.to_owned(), icon_url.to_owned());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drops all entries. Exists for tests and manual cache resets; nothing
    /// in the pipeline invalidates entries on its own.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        lock_recovering(&self.entries)
    }
}
