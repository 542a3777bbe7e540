//! In-memory collaborators for pipeline and manager tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

use reel_media::compose::segment_path;
use reel_media::{AssemblyOutput, MediaError, MediaProgress, MediaResult, Renderer};
use reel_models::{CompositionConfig, Scene, SegmentArtifact, TransitionSpec, VideoMetadata};
use reel_providers::{AudioFormat, ProviderResult, SpeechProvider, SpeechRequest, SpeechSynthesizer, VisualResolver};

use super::{Generator, PipelineConfig};
use crate::segmenter::{Segmenter, SegmenterConfig};

pub(crate) struct FakeSpeech;

#[async_trait]
impl SpeechProvider for FakeSpeech {
    async fn synthesize(&self, _request: &SpeechRequest) -> ProviderResult<Vec<u8>> {
        Ok(b"RIFFfake".to_vec())
    }

    fn audio_format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Resolves every scene to the same path; "slowpoke" scenes answer late.
pub(crate) struct FakeVisuals {
    path: PathBuf,
}

#[async_trait]
impl VisualResolver for FakeVisuals {
    async fn resolve(&self, keywords: &[String]) -> ProviderResult<PathBuf> {
        if keywords.iter().any(|k| k.contains("slowpoke")) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Ok(self.path.clone())
    }
}

/// Renderer that writes marker files and records what it was asked to do.
pub(crate) struct FakeRenderer {
    pub audio_secs: f64,
    pub composed: Mutex<Vec<u32>>,
    pub assembled: Mutex<Vec<u32>>,
    pub segment_durations: Mutex<Vec<f64>>,
    pub compose_started: Notify,
    pub(crate) compose_failures: AtomicU32,
    pub(crate) hang: AtomicBool,
}

impl Default for FakeRenderer {
    fn default() -> Self {
        Self {
            audio_secs: 3.0,
            composed: Mutex::new(Vec::new()),
            assembled: Mutex::new(Vec::new()),
            segment_durations: Mutex::new(Vec::new()),
            compose_started: Notify::new(),
            compose_failures: AtomicU32::new(0),
            hang: AtomicBool::new(false),
        }
    }
}

impl FakeRenderer {
    /// Fail the next `n` compose calls.
    pub fn fail_compose(&self, n: u32) {
        self.compose_failures.store(n, Ordering::SeqCst);
    }

    /// Block compose calls until cancelled.
    pub fn hang_compose(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn release_compose(&self) {
        self.hang.store(false, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.compose_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn measure_audio(&self, _path: &Path, _cancel: watch::Receiver<bool>) -> MediaResult<f64> {
        Ok(self.audio_secs)
    }

    async fn compose(
        &self,
        scene: &Scene,
        config: &CompositionConfig,
        scratch_dir: &Path,
        mut cancel: watch::Receiver<bool>,
        progress: MediaProgress,
    ) -> MediaResult<SegmentArtifact> {
        self.composed.lock().unwrap().push(scene.index);

        if self.hang.load(Ordering::SeqCst) {
            self.compose_started.notify_one();
            while !*cancel.borrow_and_update() {
                if cancel.changed().await.is_err() {
                    break;
                }
            }
            return Err(MediaError::Cancelled);
        }

        if self.take_failure() {
            return Err(
                MediaError::ffmpeg_failed("encoder exploded", Some("Conversion failed!".into()), Some(1))
                    .into_composition(scene.index),
            );
        }

        progress(0.5);
        let path = segment_path(scratch_dir, scene.index);
        tokio::fs::write(&path, b"segment").await?;
        progress(1.0);
        let duration_secs = scene.render_duration();
        self.segment_durations.lock().unwrap().push(duration_secs);

        Ok(SegmentArtifact {
            scene_index: scene.index,
            path,
            duration_secs,
            width: config.width,
            height: config.height,
        })
    }

    async fn assemble(
        &self,
        segments: &[SegmentArtifact],
        _transitions: &[TransitionSpec],
        config: &CompositionConfig,
        output: &Path,
        _cancel: watch::Receiver<bool>,
        progress: MediaProgress,
    ) -> MediaResult<AssemblyOutput> {
        *self.assembled.lock().unwrap() = segments.iter().map(|s| s.scene_index).collect();

        let thumbnail = output.with_extension("jpg");
        tokio::fs::write(output, b"video").await?;
        tokio::fs::write(&thumbnail, b"thumb").await?;
        progress(1.0);

        Ok(AssemblyOutput {
            video_path: output.to_path_buf(),
            thumbnail_path: thumbnail,
            metadata: VideoMetadata {
                duration_secs: segments.iter().map(|s| s.duration_secs).sum(),
                width: config.width,
                height: config.height,
                codec: "h264".into(),
                file_size_bytes: 5,
                scene_count: segments.len() as u32,
            },
        })
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

pub(crate) struct Fixture {
    pub generator: Arc<Generator>,
    pub renderer: Arc<FakeRenderer>,
    root: tempfile::TempDir,
}

impl Fixture {
    pub fn work_dir(&self) -> PathBuf {
        self.root.path().join("work")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.path().join("output")
    }
}

pub(crate) fn fixture(renderer: FakeRenderer) -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let renderer = Arc::new(renderer);
    let providers: Vec<Arc<dyn SpeechProvider>> = vec![Arc::new(FakeSpeech)];
    let speech = SpeechSynthesizer::new(providers, Duration::from_secs(5));
    let visuals = FakeVisuals {
        path: root.path().join("visual.png"),
    };
    let config = PipelineConfig {
        work_dir: root.path().join("work"),
        output_dir: root.path().join("output"),
        max_scene_parallel: 4,
    };

    let generator = Generator::new(
        Segmenter::new(SegmenterConfig::default()),
        Arc::new(speech),
        Arc::new(visuals),
        renderer.clone(),
        config,
    );

    Fixture {
        generator: Arc::new(generator),
        renderer,
        root,
    }
}
