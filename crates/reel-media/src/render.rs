//! Rendering seam between pipeline orchestration and FFmpeg.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

use crate::assemble::{assemble, plan_timeline, AssemblyOutput};
use crate::command::{FfmpegRunner, MediaProgress, SubprocessTimeouts};
use crate::compose::compose_segment;
use crate::error::MediaResult;
use reel_models::{CompositionConfig, Scene, SegmentArtifact, TransitionSpec};

/// Media operations needed to turn resolved scenes into a video.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Length of a narration file in seconds.
    async fn measure_audio(&self, path: &Path, cancel: watch::Receiver<bool>) -> MediaResult<f64>;

    /// Render one resolved scene into `scratch_dir`.
    ///
    /// `progress` receives the encoded fraction of the segment.
    async fn compose(
        &self,
        scene: &Scene,
        config: &CompositionConfig,
        scratch_dir: &Path,
        cancel: watch::Receiver<bool>,
        progress: MediaProgress,
    ) -> MediaResult<SegmentArtifact>;

    /// Join segments into `output`, producing a thumbnail beside it.
    async fn assemble(
        &self,
        segments: &[SegmentArtifact],
        transitions: &[TransitionSpec],
        config: &CompositionConfig,
        output: &Path,
        cancel: watch::Receiver<bool>,
        progress: MediaProgress,
    ) -> MediaResult<AssemblyOutput>;

    fn name(&self) -> &'static str;
}

/// Renderer backed by the FFmpeg/FFprobe command line tools.
#[derive(Debug, Clone)]
pub struct FfmpegRenderer {
    binary: PathBuf,
    timeouts: SubprocessTimeouts,
}

impl Default for FfmpegRenderer {
    fn default() -> Self {
        Self::new(SubprocessTimeouts::default())
    }
}

impl FfmpegRenderer {
    pub fn new(timeouts: SubprocessTimeouts) -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            timeouts,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn runner(&self, media_secs: f64, cancel: watch::Receiver<bool>) -> FfmpegRunner {
        FfmpegRunner::new()
            .with_binary(&self.binary)
            .with_cancel(cancel)
            .with_timeout(self.timeouts.for_media(media_secs))
    }
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn measure_audio(&self, path: &Path, cancel: watch::Receiver<bool>) -> MediaResult<f64> {
        self.runner(0.0, cancel).prober().duration(path).await
    }

    async fn compose(
        &self,
        scene: &Scene,
        config: &CompositionConfig,
        scratch_dir: &Path,
        cancel: watch::Receiver<bool>,
        progress: MediaProgress,
    ) -> MediaResult<SegmentArtifact> {
        let duration = scene.render_duration();
        let runner = self.runner(duration, cancel).with_progress(duration, progress);
        compose_segment(scene, config, scratch_dir, &runner).await
    }

    async fn assemble(
        &self,
        segments: &[SegmentArtifact],
        transitions: &[TransitionSpec],
        config: &CompositionConfig,
        output: &Path,
        cancel: watch::Receiver<bool>,
        progress: MediaProgress,
    ) -> MediaResult<AssemblyOutput> {
        let total: f64 = segments.iter().map(|s| s.duration_secs).sum();
        let planned = plan_timeline(
            &segments.iter().map(|s| s.duration_secs).collect::<Vec<_>>(),
            transitions,
        )
        .duration;
        let runner = self.runner(total, cancel).with_progress(planned, progress);
        assemble(segments, transitions, config, output, &runner).await
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
