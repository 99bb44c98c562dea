//! Shared utilities.
//!
//! URL validation (security-focused checks applied to every URL the
//! pipeline fetches, since home pages and the image URLs scraped from them
//! are attacker-influenced input) and a small locking helper shared by the
//! caches.

mod url_validator;

pub use url_validator::{validate_url, UrlPolicy, UrlValidationError};

use std::sync::{Mutex, MutexGuard};

/// Locks a std mutex, recovering the data from a poisoned lock.
///
/// Every structure the pipeline guards this way is mutated by single map
/// operations, so a panic cannot leave it in a torn state and recovery is
/// always safe.
pub(crate) fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
