//! Configuration for the icon pipeline.
//!
//! The config file is optional — a missing file yields `IconConfig::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Pipeline configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IconConfig {
    /// Directory for the on-disk image cache.
    pub cache_dir: PathBuf,

    /// Per-request timeout for home-page and image fetches, in seconds.
    pub fetch_timeout_secs: u64,

    /// Maximum accepted home-page body size in bytes.
    pub max_html_bytes: usize,

    /// Maximum accepted image size in bytes.
    pub max_image_bytes: usize,

    /// Number of decoded-bytes entries held in the in-memory image cache.
    pub memory_cache_entries: usize,

    /// Number of entries held in the conditional-request response cache.
    pub response_cache_entries: usize,

    /// User-Agent header sent on every request.
    pub user_agent: String,

    /// Permit fetches from localhost and private networks.
    /// Off by default; intended for tests and local development.
    pub allow_private_networks: bool,
}

impl Default for IconConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            fetch_timeout_secs: 20,
            max_html_bytes: 5 * 1024 * 1024,
            max_image_bytes: 10 * 1024 * 1024,
            memory_cache_entries: 128,
            response_cache_entries: 64,
            user_agent: concat!("feedicon/", env!("CARGO_PKG_VERSION")).to_string(),
            allow_private_networks: false,
        }
    }
}

/// `~/.cache/feedicon` when HOME is set, a temp-dir fallback otherwise.
fn default_cache_dir() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".cache").join("feedicon"),
        Err(_) => std::env::temp_dir().join("feedicon"),
    }
}

impl IconConfig {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(IconConfig::default())`
    /// - Empty file → `Ok(IconConfig::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check file size before reading to prevent memory exhaustion from a
        // maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "cache_dir",
                "fetch_timeout_secs",
                "max_html_bytes",
                "max_image_bytes",
                "memory_cache_entries",
                "response_cache_entries",
                "user_agent",
                "allow_private_networks",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: IconConfig = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            cache_dir = %config.cache_dir.display(),
            "Loaded configuration"
        );
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
