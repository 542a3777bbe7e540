//! Speech synthesis: provider trait, concrete providers and the fallback chain.

mod command;
mod config;
mod http;
mod orchestrator;

pub use command::{CommandSpeechConfig, CommandSpeechProvider};
pub use config::SpeechConfig;
pub use http::{HttpSpeechConfig, HttpSpeechProvider};
pub use orchestrator::{SpeechSynthesizer, SynthesizedSpeech};

use async_trait::async_trait;

use crate::error::ProviderResult;

/// Audio container produced by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }
}

/// Input for a single synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    /// BCP-47 language tag
    pub language: String,
    /// Provider-specific voice; providers fall back to their default
    pub voice: Option<String>,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: language.into(),
            voice: None,
        }
    }

    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice = voice;
        self
    }

    /// Primary language subtag ("hi" for "hi-IN").
    pub fn primary_language(&self) -> &str {
        self.language.split(['-', '_']).next().unwrap_or(&self.language)
    }
}

/// A text-to-speech backend.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Synthesize `request` and return encoded audio bytes.
    async fn synthesize(&self, request: &SpeechRequest) -> ProviderResult<Vec<u8>>;

    fn audio_format(&self) -> AudioFormat;

    fn name(&self) -> &str;
}
