//! Pexels-style stock photo search.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::VisualConfig;
use crate::error::{ProviderError, ProviderResult};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    src: PhotoSources,
}

#[derive(Debug, Deserialize)]
struct PhotoSources {
    portrait: Option<String>,
    landscape: Option<String>,
    original: Option<String>,
}

/// Client for `GET {base}/v1/search`.
pub struct StockSearchClient {
    http: Client,
    endpoint: Url,
    api_key: String,
    orientation: String,
}

impl StockSearchClient {
    pub fn new(config: &VisualConfig, api_key: impl Into<String>) -> ProviderResult<Self> {
        let endpoint = Url::parse(&config.search_url)
            .and_then(|base| base.join("v1/search"))
            .map_err(|e| ProviderError::Config(format!("invalid search URL {}: {}", config.search_url, e)))?;
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self {
            http,
            endpoint,
            api_key: api_key.into(),
            orientation: config.orientation.clone(),
        })
    }

    /// URL of the best match for `query`, if any.
    pub async fn search(&self, query: &str) -> ProviderResult<Option<String>> {
        let response = self
            .http
            .get(self.endpoint.clone())
            .header("Authorization", &self.api_key)
            .query(&[
                ("query", query),
                ("per_page", "1"),
                ("orientation", self.orientation.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(status.as_u16(), body));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        debug!(query, hits = parsed.photos.len(), "Stock search finished");

        let portrait = self.orientation == "portrait";
        Ok(parsed.photos.into_iter().next().and_then(|p| {
            let preferred = if portrait { p.src.portrait } else { p.src.landscape };
            preferred.or(p.src.original)
        }))
    }

    /// Fetch an image, rejecting bodies that are not a recognizable image
    /// (error pages served with 200, truncated responses).
    pub async fn download(&self, url: &str) -> ProviderResult<Vec<u8>> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_http_status(status.as_u16(), url));
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(ProviderError::InvalidResponse(format!("empty image at {}", url)));
        }
        let format = image::guess_format(&bytes)
            .map_err(|_| ProviderError::InvalidResponse(format!("{} did not return an image", url)))?;
        debug!(url, ?format, size = bytes.len(), "Image downloaded");
        Ok(bytes.to_vec())
    }
}
