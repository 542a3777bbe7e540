//! Generation requests submitted by callers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use validator::{Validate, ValidationError};

use crate::scene::Transition;

/// Maximum accepted script length in characters.
pub const MAX_SCRIPT_CHARS: u64 = 20_000;

/// Target platform for the rendered video.
///
/// A preset fixes the output resolution, the aspect ratio and the longest
/// video the platform accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlatformPreset {
    #[default]
    Tiktok,
    YoutubeShorts,
    InstagramReels,
    Square,
    Landscape,
}

impl PlatformPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformPreset::Tiktok => "tiktok",
            PlatformPreset::YoutubeShorts => "youtube_shorts",
            PlatformPreset::InstagramReels => "instagram_reels",
            PlatformPreset::Square => "square",
            PlatformPreset::Landscape => "landscape",
        }
    }

    /// Output resolution as (width, height).
    pub fn resolution(&self) -> (u32, u32) {
        match self {
            PlatformPreset::Tiktok | PlatformPreset::YoutubeShorts | PlatformPreset::InstagramReels => {
                (1080, 1920)
            }
            PlatformPreset::Square => (1080, 1080),
            PlatformPreset::Landscape => (1920, 1080),
        }
    }

    /// Aspect ratio as (width, height) in lowest terms.
    pub fn aspect_ratio(&self) -> (u32, u32) {
        match self {
            PlatformPreset::Square => (1, 1),
            PlatformPreset::Landscape => (16, 9),
            _ => (9, 16),
        }
    }

    /// Longest video the platform accepts, in seconds.
    pub fn max_duration_secs(&self) -> u32 {
        match self {
            PlatformPreset::Tiktok => 180,
            PlatformPreset::YoutubeShorts => 60,
            PlatformPreset::InstagramReels => 90,
            PlatformPreset::Square => 60,
            PlatformPreset::Landscape => 600,
        }
    }

    pub fn is_portrait(&self) -> bool {
        let (w, h) = self.resolution();
        h > w
    }
}

impl fmt::Display for PlatformPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlatformPreset {
    type Err = PlatformParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "tiktok" => Ok(PlatformPreset::Tiktok),
            "youtube_shorts" | "shorts" => Ok(PlatformPreset::YoutubeShorts),
            "instagram_reels" | "reels" => Ok(PlatformPreset::InstagramReels),
            "square" => Ok(PlatformPreset::Square),
            "landscape" | "youtube" => Ok(PlatformPreset::Landscape),
            _ => Err(PlatformParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown platform preset: {0}")]
pub struct PlatformParseError(String);

/// Scheduling priority. Higher priorities are dequeued first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// A request to render one video from a script.
///
/// Requests are immutable once accepted; every derived value (scenes, audio,
/// segments) lives in the processing run, never on the request itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct GenerationRequest {
    /// Opaque caller identifier used for listing
    #[validate(length(min = 1, max = 128))]
    pub requester: String,

    /// Narration script
    #[validate(
        length(min = 1, max = 20000),
        custom(function = "validate_not_blank")
    )]
    pub script: String,

    /// BCP-47 language tag for narration (e.g. "en", "hi-IN")
    #[serde(default = "default_language")]
    #[validate(length(min = 2, max = 16), custom(function = "validate_language"))]
    pub language: String,

    /// Provider-specific voice selector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 64), custom(function = "validate_voice"))]
    pub voice: Option<String>,

    /// Output platform preset
    #[serde(default)]
    pub platform: PlatformPreset,

    /// Queue priority
    #[serde(default)]
    pub priority: Priority,

    /// Transition applied between every pair of scenes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,

    /// Burn the narration text into each scene
    #[serde(default)]
    pub captions: bool,

    /// Desired total length; defaults to the platform maximum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 1, max = 3600))]
    pub target_duration_secs: Option<u32>,
}

fn default_language() -> String {
    "en".to_string()
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("script must contain text".into());
        return Err(err);
    }
    Ok(())
}

/// Whether `value` is a plain voice name (`en_US-amy`, `hi+f2`, `alloy.v2`).
///
/// Voices reach command-line engines as arguments, so option-like and
/// path-like values are refused.
fn is_plain_voice_name(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-'))
}

fn validate_voice(value: &str) -> Result<(), ValidationError> {
    if !is_plain_voice_name(value) {
        let mut err = ValidationError::new("voice");
        err.message = Some("voice may only contain letters, digits, '_', '.', '+' and '-'".into());
        return Err(err);
    }
    Ok(())
}

fn validate_language(value: &str) -> Result<(), ValidationError> {
    let well_formed = !value.starts_with('-') && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !well_formed {
        let mut err = ValidationError::new("language");
        err.message = Some("language must be a BCP-47 tag".into());
        return Err(err);
    }
    Ok(())
}

impl GenerationRequest {
    /// Create a request with default language, platform and priority.
    pub fn new(requester: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            requester: requester.into(),
            script: script.into(),
            language: default_language(),
            voice: None,
            platform: PlatformPreset::default(),
            priority: Priority::default(),
            transition: None,
            captions: false,
            target_duration_secs: None,
        }
    }

    pub fn with_platform(mut self, platform: PlatformPreset) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = Some(transition);
        self
    }

    pub fn with_captions(mut self, captions: bool) -> Self {
        self.captions = captions;
        self
    }

    /// Duration budget for the whole video in seconds.
    pub fn duration_budget_secs(&self) -> u32 {
        let max = self.platform.max_duration_secs();
        self.target_duration_secs.map(|t| t.min(max)).unwrap_or(max)
    }

    /// Flatten validator output into a single readable message.
    pub fn validation_message(errors: &validator::ValidationErrors) -> String {
        let mut parts: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, errs)| {
                let reasons: Vec<String> = errs
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|m| m.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                format!("{}: {}", field, reasons.join(", "))
            })
            .collect();
        parts.sort();
        parts.join("; ")
    }
}
