//! Rendered video metadata.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Facts about a rendered video file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct VideoMetadata {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    /// Video codec name as reported by ffprobe
    pub codec: String,
    pub file_size_bytes: u64,
    #[serde(default)]
    pub scene_count: u32,
}

impl VideoMetadata {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}
