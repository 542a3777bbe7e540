//! Disk-cached visual resolver.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{
    cache_key, cached_photo_path, normalize_keywords, placeholder_path, render_placeholder, StockSearchClient,
    VisualConfig, VisualResolver,
};
use crate::error::{ProviderError, ProviderResult};

/// Resolves keywords through a content-addressed cache backed by stock search.
pub struct CachedVisualResolver {
    config: VisualConfig,
    search: Option<StockSearchClient>,
}

impl CachedVisualResolver {
    pub fn new(config: VisualConfig) -> ProviderResult<Self> {
        let search = match &config.api_key {
            Some(key) => Some(StockSearchClient::new(&config, key.clone())?),
            None => {
                info!("No visual search key configured, using placeholders only");
                None
            }
        };
        Ok(Self { config, search })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    async fn fetch(&self, search: &StockSearchClient, query: &str, target: &Path) -> ProviderResult<bool> {
        let Some(url) = search.search(query).await? else {
            return Ok(false);
        };
        let bytes = search.download(&url).await?;

        tokio::fs::create_dir_all(&self.config.cache_dir).await?;
        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&self.config.cache_dir)?
            .into_temp_path();
        tokio::fs::write(&temp, &bytes).await?;
        temp.persist(target).map_err(|e| ProviderError::Io(e.error))?;
        Ok(true)
    }

    async fn placeholder(&self, key: &str) -> ProviderResult<PathBuf> {
        let path = placeholder_path(&self.config.cache_dir, key);
        render_placeholder(
            &path,
            key,
            self.config.placeholder_width,
            self.config.placeholder_height,
        )
        .await
    }
}

#[async_trait]
impl VisualResolver for CachedVisualResolver {
    async fn resolve(&self, keywords: &[String]) -> ProviderResult<PathBuf> {
        let key = cache_key(keywords);
        let cached = cached_photo_path(&self.config.cache_dir, &key);

        if tokio::fs::try_exists(&cached).await.unwrap_or(false) {
            debug!(key = %key, "Visual cache hit");
            metrics::counter!("reel_visual_cache_total", "result" => "hit").increment(1);
            return Ok(cached);
        }
        metrics::counter!("reel_visual_cache_total", "result" => "miss").increment(1);

        let query = normalize_keywords(keywords).join(" ");
        if let (Some(search), false) = (&self.search, query.is_empty()) {
            match self.fetch(search, &query, &cached).await {
                Ok(true) => {
                    debug!(key = %key, query = %query, "Visual downloaded");
                    return Ok(cached);
                }
                Ok(false) => debug!(query = %query, "No stock results, using placeholder"),
                Err(e) => warn!(query = %query, error = %e, "Visual search failed, using placeholder"),
            }
        }

        self.placeholder(&key).await
    }
}
