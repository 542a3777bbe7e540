//! Segment composition configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::request::PlatformPreset;

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 20;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
/// Default output frame rate
pub const DEFAULT_FPS: u32 = 30;
/// Audio sample rate shared by every segment so they concatenate cleanly
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;

/// Thumbnail width; height follows the aspect ratio
pub const THUMBNAIL_SCALE_WIDTH: u32 = 480;

/// How a visual with a different aspect ratio is fitted to the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum LetterboxMode {
    /// Scale to fit and pad with bars
    #[default]
    Pad,
    /// Scale to fill and crop the overflow
    Crop,
}

/// Encoding parameters for every segment of one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompositionConfig {
    pub width: u32,
    pub height: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Target video bitrate (e.g. "6M"); CRF is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_bitrate: Option<String>,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default = "default_crf")]
    pub crf: u8,

    #[serde(default)]
    pub letterbox: LetterboxMode,

    /// Bar color for padded letterboxing
    #[serde(default = "default_pad_color")]
    pub pad_color: String,
}

fn default_fps() -> u32 {
    DEFAULT_FPS
}
fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_pad_color() -> String {
    "black".to_string()
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self::for_platform(PlatformPreset::default())
    }
}

impl CompositionConfig {
    /// Configuration for a platform preset.
    ///
    /// Portrait presets crop wide stock visuals to fill the frame; square and
    /// landscape presets pad instead.
    pub fn for_platform(platform: PlatformPreset) -> Self {
        let (width, height) = platform.resolution();
        Self {
            width,
            height,
            fps: DEFAULT_FPS,
            video_codec: DEFAULT_VIDEO_CODEC.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            video_bitrate: None,
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
            letterbox: if platform.is_portrait() {
                LetterboxMode::Crop
            } else {
                LetterboxMode::Pad
            },
            pad_color: default_pad_color(),
        }
    }

    pub fn with_letterbox(mut self, mode: LetterboxMode) -> Self {
        self.letterbox = mode;
        self
    }

    pub fn with_bitrate(mut self, bitrate: impl Into<String>) -> Self {
        self.video_bitrate = Some(bitrate.into());
        self
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Convert to FFmpeg output encoding arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-preset".to_string(),
            self.preset.clone(),
        ];

        match &self.video_bitrate {
            Some(bitrate) => args.extend_from_slice(&["-b:v".to_string(), bitrate.clone()]),
            None => args.extend_from_slice(&["-crf".to_string(), self.crf.to_string()]),
        }

        args.extend_from_slice(&[
            "-r".to_string(),
            self.fps.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-c:a".to_string(),
            self.audio_codec.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
            "-ar".to_string(),
            AUDIO_SAMPLE_RATE.to_string(),
            "-ac".to_string(),
            "2".to_string(),
        ]);

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_configs() {
        let portrait = CompositionConfig::for_platform(PlatformPreset::Tiktok);
        assert_eq!(portrait.resolution(), "1080x1920");
        assert_eq!(portrait.letterbox, LetterboxMode::Crop);

        let landscape = CompositionConfig::for_platform(PlatformPreset::Landscape);
        assert_eq!(landscape.resolution(), "1920x1080");
        assert_eq!(landscape.letterbox, LetterboxMode::Pad);
    }

    #[test]
    fn test_ffmpeg_args_use_crf_by_default() {
        let args = CompositionConfig::default().to_ffmpeg_args();
        assert!(args.windows(2).any(|w| w[0] == "-crf" && w[1] == "20"));
        assert!(!args.contains(&"-b:v".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-ar" && w[1] == "44100"));
    }

    #[test]
    fn test_ffmpeg_args_bitrate_replaces_crf() {
        let args = CompositionConfig::default().with_bitrate("6M").to_ffmpeg_args();
        assert!(args.windows(2).any(|w| w[0] == "-b:v" && w[1] == "6M"));
        assert!(!args.contains(&"-crf".to_string()));
    }
}
