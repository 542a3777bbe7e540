//! Scenes, transitions and text overlays.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Default blend length for overlapping transitions.
pub const DEFAULT_BLEND_SECS: f64 = 0.5;

/// Transition from one scene to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Hard boundary, no overlap
    Cut,
    #[default]
    Fade,
    Dissolve,
    Slide,
    Wipe,
    Zoom,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Cut => "cut",
            Transition::Fade => "fade",
            Transition::Dissolve => "dissolve",
            Transition::Slide => "slide",
            Transition::Wipe => "wipe",
            Transition::Zoom => "zoom",
        }
    }

    pub fn is_cut(&self) -> bool {
        matches!(self, Transition::Cut)
    }

    /// FFmpeg `xfade` transition name, `None` for hard cuts.
    pub fn xfade_name(&self) -> Option<&'static str> {
        match self {
            Transition::Cut => None,
            Transition::Fade => Some("fade"),
            Transition::Dissolve => Some("dissolve"),
            Transition::Slide => Some("slideleft"),
            Transition::Wipe => Some("wipeleft"),
            Transition::Zoom => Some("zoomin"),
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Transition {
    type Err = TransitionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cut" => Ok(Transition::Cut),
            "fade" => Ok(Transition::Fade),
            "dissolve" => Ok(Transition::Dissolve),
            "slide" => Ok(Transition::Slide),
            "wipe" => Ok(Transition::Wipe),
            "zoom" => Ok(Transition::Zoom),
            _ => Err(TransitionParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown transition: {0}")]
pub struct TransitionParseError(String);

/// Transition placed between two adjacent segments during assembly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TransitionSpec {
    pub kind: Transition,
    /// Overlap in seconds; ignored for cuts
    pub blend_secs: f64,
}

impl TransitionSpec {
    pub fn new(kind: Transition) -> Self {
        Self {
            kind,
            blend_secs: if kind.is_cut() { 0.0 } else { DEFAULT_BLEND_SECS },
        }
    }

    pub fn cut() -> Self {
        Self::new(Transition::Cut)
    }

    pub fn with_blend(mut self, secs: f64) -> Self {
        if !self.kind.is_cut() {
            self.blend_secs = secs.max(0.0);
        }
        self
    }
}

/// Vertical placement of a text overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPosition {
    Top,
    Center,
    #[default]
    Bottom,
}

/// Visual style of a text overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OverlayStyle {
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_font_color")]
    pub font_color: String,
    /// Background box color; `None` disables the box
    #[serde(default = "default_box_color")]
    pub box_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_file: Option<PathBuf>,
}

fn default_font_size() -> u32 {
    56
}
fn default_font_color() -> String {
    "white".to_string()
}
fn default_box_color() -> Option<String> {
    Some("black@0.5".to_string())
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            font_size: default_font_size(),
            font_color: default_font_color(),
            box_color: default_box_color(),
            font_file: None,
        }
    }
}

/// Text burned into a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TextOverlay {
    pub text: String,
    #[serde(default)]
    pub position: OverlayPosition,
    #[serde(default)]
    pub style: OverlayStyle,
}

impl TextOverlay {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            position: OverlayPosition::default(),
            style: OverlayStyle::default(),
        }
    }

    pub fn at(mut self, position: OverlayPosition) -> Self {
        self.position = position;
        self
    }
}

/// One narrated unit of the final video.
///
/// Created by the segmenter with text, duration estimate and transition.
/// The resolution stage attaches `visual`, `audio` and `audio_duration`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Scene {
    /// Zero-based position in the final video
    pub index: u32,
    pub text: String,
    /// Seconds; always > 0
    pub duration_secs: f64,
    /// Visual search terms
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Transition into the next scene
    #[serde(default)]
    pub transition: Transition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<TextOverlay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration_secs: Option<f64>,
}

impl Scene {
    pub fn new(index: u32, text: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            index,
            text: text.into(),
            duration_secs,
            keywords: Vec::new(),
            transition: Transition::default(),
            overlay: None,
            visual: None,
            audio: None,
            audio_duration_secs: None,
        }
    }

    /// Rendered length: narration length when known, capped by the scene duration.
    pub fn render_duration(&self) -> f64 {
        match self.audio_duration_secs {
            Some(audio) if audio > 0.0 => audio.min(self.duration_secs),
            _ => self.duration_secs,
        }
    }
}

/// One rendered scene awaiting assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentArtifact {
    pub scene_index: u32,
    pub path: PathBuf,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_xfade_names() {
        assert_eq!(Transition::Cut.xfade_name(), None);
        assert_eq!(Transition::Fade.xfade_name(), Some("fade"));
        assert_eq!(Transition::Slide.xfade_name(), Some("slideleft"));
        assert_eq!(Transition::Zoom.xfade_name(), Some("zoomin"));
    }

    #[test]
    fn test_transition_spec_blend() {
        assert_eq!(TransitionSpec::cut().blend_secs, 0.0);
        assert_eq!(TransitionSpec::new(Transition::Wipe).blend_secs, DEFAULT_BLEND_SECS);
        assert_eq!(TransitionSpec::cut().with_blend(1.0).blend_secs, 0.0);
        assert_eq!(TransitionSpec::new(Transition::Fade).with_blend(-1.0).blend_secs, 0.0);
    }

    #[test]
    fn test_render_duration_prefers_shorter() {
        let mut scene = Scene::new(0, "hello", 4.0);
        assert_eq!(scene.render_duration(), 4.0);
        scene.audio_duration_secs = Some(3.2);
        assert_eq!(scene.render_duration(), 3.2);
        scene.audio_duration_secs = Some(6.0);
        assert_eq!(scene.render_duration(), 4.0);
    }

    #[test]
    fn test_transition_parse() {
        assert_eq!("Dissolve".parse::<Transition>().unwrap(), Transition::Dissolve);
        assert!("spin".parse::<Transition>().is_err());
    }

    #[test]
    fn test_overlay_style_defaults_from_json() {
        let overlay: TextOverlay = serde_json::from_str(r#"{"text":"Hi"}"#).unwrap();
        assert_eq!(overlay.position, OverlayPosition::Bottom);
        assert_eq!(overlay.style.font_size, 56);
        assert_eq!(overlay.style.box_color.as_deref(), Some("black@0.5"));
    }
}
