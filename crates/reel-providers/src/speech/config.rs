//! Speech provider chain configuration.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{
    CommandSpeechConfig, CommandSpeechProvider, HttpSpeechConfig, HttpSpeechProvider, SpeechProvider,
    SpeechSynthesizer,
};
use crate::error::ProviderResult;

/// Which providers to try, in which order, and how long each may take.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Provider names in fallback order
    pub providers: Vec<String>,
    pub timeout: Duration,
    pub http: HttpSpeechConfig,
    pub espeak_binary: String,
    pub piper_binary: String,
    pub piper_model: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            providers: vec!["openai".to_string(), "espeak".to_string()],
            timeout: Duration::from_secs(45),
            http: HttpSpeechConfig::default(),
            espeak_binary: "espeak-ng".to_string(),
            piper_binary: "piper".to_string(),
            piper_model: None,
        }
    }
}

impl SpeechConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let http = HttpSpeechConfig::from_env();
        Self {
            providers: std::env::var("SPEECH_PROVIDERS")
                .map(|s| parse_provider_list(&s))
                .unwrap_or(defaults.providers),
            timeout: http.timeout,
            http,
            espeak_binary: std::env::var("ESPEAK_BINARY").unwrap_or(defaults.espeak_binary),
            piper_binary: std::env::var("PIPER_BINARY").unwrap_or(defaults.piper_binary),
            piper_model: std::env::var("PIPER_MODEL").ok().filter(|m| !m.is_empty()),
        }
    }

    /// Instantiate the configured providers, skipping those that cannot run.
    pub fn build_providers(&self) -> ProviderResult<Vec<Arc<dyn SpeechProvider>>> {
        let mut providers: Vec<Arc<dyn SpeechProvider>> = Vec::new();

        for name in &self.providers {
            match name.as_str() {
                "openai" => {
                    if self.http.api_key.is_none() {
                        warn!("OPENAI_API_KEY not set, skipping openai speech provider");
                        continue;
                    }
                    providers.push(Arc::new(HttpSpeechProvider::new(self.http.clone())?));
                }
                "espeak" => {
                    providers.push(Arc::new(CommandSpeechProvider::new(CommandSpeechConfig::espeak(
                        &self.espeak_binary,
                    ))));
                }
                "piper" => match &self.piper_model {
                    Some(model) => providers.push(Arc::new(CommandSpeechProvider::new(
                        CommandSpeechConfig::piper(&self.piper_binary, model),
                    ))),
                    None => warn!("PIPER_MODEL not set, skipping piper speech provider"),
                },
                other => warn!(provider = other, "Unknown speech provider, ignoring"),
            }
        }

        Ok(providers)
    }

    pub fn build_synthesizer(&self) -> ProviderResult<SpeechSynthesizer> {
        let providers = self.build_providers()?;
        let synth = SpeechSynthesizer::new(providers, self.timeout);
        info!(providers = ?synth.provider_names(), "Speech chain configured");
        Ok(synth)
    }
}

fn parse_provider_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
