//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::command::wait_for_cancel;
use crate::error::{MediaError, MediaResult};
use reel_models::VideoMetadata;

/// Media file information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    /// File size in bytes
    pub size: u64,
    /// Bitrate in bits/second
    pub bitrate: u64,
}

impl MediaInfo {
    pub fn has_video(&self) -> bool {
        self.video_codec.is_some()
    }

    /// Convert to the metadata reported for a finished video.
    pub fn to_metadata(&self, scene_count: u32) -> VideoMetadata {
        VideoMetadata {
            duration_secs: self.duration,
            width: self.width,
            height: self.height,
            codec: self.video_codec.clone().unwrap_or_default(),
            file_size_bytes: self.size,
            scene_count,
        }
    }
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

/// Default ceiling for a single ffprobe call.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs ffprobe with a deadline and an optional cancellation flag.
#[derive(Debug, Clone)]
pub struct Prober {
    binary: PathBuf,
    timeout: Duration,
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl Default for Prober {
    fn default() -> Self {
        Self::new()
    }
}

impl Prober {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffprobe"),
            timeout: DEFAULT_PROBE_TIMEOUT,
            cancel_rx: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_cancel(&self) -> bool {
        self.cancel_rx.is_some()
    }

    /// Read stream and container information for a media file.
    pub async fn probe(&self, path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }
        if self.cancel_rx.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(MediaError::Cancelled);
        }

        let binary = which::which(&self.binary).map_err(|_| MediaError::FfprobeNotFound)?;

        let child = Command::new(binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the pending output future kills the child
        let output = tokio::select! {
            output = child.wait_with_output() => output?,
            _ = tokio::time::sleep(self.timeout) => {
                warn!(path = %path.display(), "FFprobe timed out after {:?}", self.timeout);
                return Err(MediaError::Timeout(self.timeout.as_secs()));
            }
            _ = wait_for_cancel(self.cancel_rx.clone()) => {
                debug!(path = %path.display(), "FFprobe cancelled");
                return Err(MediaError::Cancelled);
            }
        };

        if !output.status.success() {
            return Err(MediaError::FfprobeFailed {
                message: format!("FFprobe failed for {}", path.display()),
                stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
            });
        }

        parse_ffprobe_output(&output.stdout)
    }

    /// Duration in seconds of any media file.
    pub async fn duration(&self, path: impl AsRef<Path>) -> MediaResult<f64> {
        let path = path.as_ref();
        let info = self.probe(path).await?;
        if info.duration <= 0.0 {
            return Err(MediaError::InvalidMedia(format!(
                "{} has no measurable duration",
                path.display()
            )));
        }
        Ok(info.duration)
    }
}

fn parse_ffprobe_output(stdout: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video = probe.streams.iter().find(|s| s.codec_type == "video");
    let audio = probe.streams.iter().find(|s| s.codec_type == "audio");

    if video.is_none() && audio.is_none() {
        return Err(MediaError::InvalidMedia("No audio or video stream found".to_string()));
    }

    // Container duration first, stream duration as a fallback (raw audio)
    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            probe
                .streams
                .iter()
                .filter_map(|s| s.duration.as_deref()?.parse::<f64>().ok())
                .reduce(f64::max)
        })
        .unwrap_or(0.0);

    let fps = video
        .and_then(|v| v.avg_frame_rate.as_deref().or(v.r_frame_rate.as_deref()))
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);

    Ok(MediaInfo {
        duration,
        width: video.and_then(|v| v.width).unwrap_or(0),
        height: video.and_then(|v| v.height).unwrap_or(0),
        fps,
        video_codec: video.and_then(|v| v.codec_name.clone()),
        audio_codec: audio.and_then(|a| a.codec_name.clone()),
        size: probe.format.size.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0),
        bitrate: probe.format.bit_rate.as_deref().and_then(|b| b.parse().ok()).unwrap_or(0),
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        return (den > 0.0).then(|| num / den);
    }
    s.parse().ok()
}
