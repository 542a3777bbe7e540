//! OpenAI-compatible HTTP speech provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{AudioFormat, SpeechProvider, SpeechRequest};
use crate::error::{ProviderError, ProviderResult};

/// Configuration for an HTTP speech endpoint.
#[derive(Debug, Clone)]
pub struct HttpSpeechConfig {
    /// Name used in logs and metrics
    pub name: String,
    /// Base URL; the request goes to `{base_url}/v1/audio/speech`
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub default_voice: String,
    pub timeout: Duration,
}

impl Default for HttpSpeechConfig {
    fn default() -> Self {
        Self {
            name: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: "gpt-4o-mini-tts".to_string(),
            default_voice: "alloy".to_string(),
            timeout: Duration::from_secs(45),
        }
    }
}

impl HttpSpeechConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name: defaults.name,
            base_url: std::env::var("OPENAI_TTS_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("OPENAI_TTS_MODEL").unwrap_or(defaults.model),
            default_voice: std::env::var("OPENAI_TTS_VOICE").unwrap_or(defaults.default_voice),
            timeout: Duration::from_secs(
                std::env::var("SPEECH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(45),
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct SpeechBody<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
    language: &'a str,
}

/// Speech provider speaking the `/v1/audio/speech` protocol.
pub struct HttpSpeechProvider {
    http: Client,
    endpoint: Url,
    config: HttpSpeechConfig,
}

impl HttpSpeechProvider {
    pub fn new(config: HttpSpeechConfig) -> ProviderResult<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| ProviderError::Config(format!("invalid base URL {}: {}", config.base_url, e)))?;
        let endpoint = base
            .join("v1/audio/speech")
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self { http, endpoint, config })
    }
}

#[async_trait]
impl SpeechProvider for HttpSpeechProvider {
    async fn synthesize(&self, request: &SpeechRequest) -> ProviderResult<Vec<u8>> {
        let body = SpeechBody {
            model: &self.config.model,
            input: &request.text,
            voice: request.voice.as_deref().unwrap_or(&self.config.default_voice),
            response_format: "mp3",
            language: &request.language,
        };

        debug!("Sending speech request to {}", self.endpoint);

        let mut builder = self.http.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.config.timeout.as_secs())
            } else {
                ProviderError::Network(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_http_status(status.as_u16(), body));
        }

        Ok(response.bytes().await?.to_vec())
    }

    fn audio_format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}
