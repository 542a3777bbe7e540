//! Visual asset resolution: keywords to a local image path.

mod cached;
mod placeholder;
mod search;

pub use cached::CachedVisualResolver;
pub use placeholder::{placeholder_color, render_placeholder};
pub use search::StockSearchClient;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ProviderResult;

/// Finds a visual for a scene.
///
/// Upstream failures degrade to a local placeholder; an error means the local
/// cache itself could not be written.
#[async_trait]
pub trait VisualResolver: Send + Sync {
    async fn resolve(&self, keywords: &[String]) -> ProviderResult<PathBuf>;
}

/// Visual resolver configuration.
#[derive(Debug, Clone)]
pub struct VisualConfig {
    /// Stock photo API base URL
    pub search_url: String,
    /// Search is skipped entirely without a key
    pub api_key: Option<String>,
    pub cache_dir: PathBuf,
    pub orientation: String,
    pub timeout: Duration,
    pub placeholder_width: u32,
    pub placeholder_height: u32,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            search_url: "https://api.pexels.com".to_string(),
            api_key: None,
            cache_dir: PathBuf::from("./cache/visuals"),
            orientation: "portrait".to_string(),
            timeout: Duration::from_secs(30),
            placeholder_width: 1080,
            placeholder_height: 1920,
        }
    }
}

impl VisualConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            search_url: std::env::var("VISUAL_SEARCH_URL").unwrap_or(defaults.search_url),
            api_key: std::env::var("VISUAL_SEARCH_API_KEY").ok().filter(|k| !k.is_empty()),
            cache_dir: std::env::var("VISUAL_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            orientation: std::env::var("VISUAL_ORIENTATION").unwrap_or(defaults.orientation),
            timeout: std::env::var("VISUAL_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            ..defaults
        }
    }
}

/// Lowercased, trimmed, sorted, deduplicated keywords.
pub fn normalize_keywords(keywords: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Hex SHA-256 of the normalized keyword list.
pub fn cache_key(keywords: &[String]) -> String {
    let joined = normalize_keywords(keywords).join(" ");
    format!("{:x}", Sha256::digest(joined.as_bytes()))
}

pub(crate) fn cached_photo_path(cache_dir: &Path, key: &str) -> PathBuf {
    cache_dir.join(format!("{}.jpg", key))
}

pub(crate) fn placeholder_path(cache_dir: &Path, key: &str) -> PathBuf {
    cache_dir.join(format!("{}.png", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_cache_key_ignores_case_order_and_duplicates() {
        let a = cache_key(&kw(&["Ocean", "sunset"]));
        let b = cache_key(&kw(&[" sunset ", "ocean", "OCEAN"]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, cache_key(&kw(&["ocean"])));
    }

    #[test]
    fn test_normalize_drops_blanks() {
        assert_eq!(normalize_keywords(&kw(&["", "  ", "City"])), ["city"]);
    }
}
