//! Generation pipeline: script to published video.
//!
//! Stages run in order on the job's worker:
//! segmenting, per-scene resolution (narration + visual, bounded parallelism),
//! sequential composition, assembly, and finalizing into the output directory.
//! All intermediate files live in a per-run scratch directory that is removed
//! whatever the outcome.

mod progress;
#[cfg(test)]
pub(crate) mod testing;

pub use progress::{ProgressCallback, ProgressReporter, Stage};

use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use reel_media::fs_utils::{move_file, remove_quietly};
use reel_media::{AssemblyOutput, FfmpegRenderer, MediaError, Renderer};
use reel_models::{
    CompositionConfig, GenerationRequest, JobId, JobResult, Scene, SegmentArtifact, TransitionSpec,
};
use reel_providers::{
    CachedVisualResolver, SpeechConfig, SpeechRequest, SpeechSynthesizer, VisualConfig, VisualResolver,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::segmenter::Segmenter;

pub const VIDEO_FILE_NAME: &str = "video.mp4";
pub const THUMBNAIL_FILE_NAME: &str = "thumbnail.jpg";

/// Filesystem layout and fan-out for pipeline runs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_scene_parallel: usize,
}

impl From<&WorkerConfig> for PipelineConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            output_dir: config.output_dir.clone(),
            max_scene_parallel: config.max_scene_parallel,
        }
    }
}

/// Directory holding a job's published artifacts.
pub fn job_output_dir(output_dir: &Path, job_id: &JobId) -> PathBuf {
    output_dir.join(job_id.as_str())
}

/// Transitions between consecutive scenes, one fewer than the scenes.
pub fn transition_specs(scenes: &[Scene]) -> Vec<TransitionSpec> {
    let joins = scenes.len().saturating_sub(1);
    scenes[..joins].iter().map(|s| TransitionSpec::new(s.transition)).collect()
}

struct RunContext<'a> {
    job_id: &'a JobId,
    request: &'a GenerationRequest,
    composition: CompositionConfig,
    progress: Arc<ProgressReporter>,
    cancel: watch::Receiver<bool>,
    scratch: &'a Path,
}

impl RunContext<'_> {
    fn checkpoint(&self) -> WorkerResult<()> {
        if *self.cancel.borrow() {
            return Err(WorkerError::Cancelled);
        }
        Ok(())
    }
}

/// Runs one generation request end to end.
pub struct Generator {
    segmenter: Segmenter,
    speech: Arc<SpeechSynthesizer>,
    visuals: Arc<dyn VisualResolver>,
    renderer: Arc<dyn Renderer>,
    config: PipelineConfig,
}

impl Generator {
    pub fn new(
        segmenter: Segmenter,
        speech: Arc<SpeechSynthesizer>,
        visuals: Arc<dyn VisualResolver>,
        renderer: Arc<dyn Renderer>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            segmenter,
            speech,
            visuals,
            renderer,
            config,
        }
    }

    /// Production wiring: environment-configured providers and FFmpeg.
    pub fn from_config(config: &WorkerConfig) -> WorkerResult<Self> {
        let speech = SpeechConfig::from_env()
            .build_synthesizer()
            .map_err(|e| WorkerError::internal(format!("speech providers: {}", e)))?;
        if speech.is_empty() {
            warn!("No speech providers configured; every job will fail at narration");
        } else {
            info!(providers = ?speech.provider_names(), "Speech providers ready");
        }

        let visuals = CachedVisualResolver::new(VisualConfig::from_env())
            .map_err(|e| WorkerError::internal(format!("visual resolver: {}", e)))?;
        let renderer = FfmpegRenderer::new(config.ffmpeg_timeouts);

        Ok(Self::new(
            Segmenter::new(config.segmenter.clone()),
            Arc::new(speech),
            Arc::new(visuals),
            Arc::new(renderer),
            PipelineConfig::from(config),
        ))
    }

    pub fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn speech(&self) -> &SpeechSynthesizer {
        &self.speech
    }

    /// Render `request` and publish it under the output directory.
    ///
    /// Returns exactly one outcome; on any error no artifact is left behind.
    pub async fn generate(
        &self,
        job_id: &JobId,
        request: &GenerationRequest,
        progress: ProgressCallback,
        cancel: watch::Receiver<bool>,
    ) -> WorkerResult<JobResult> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", job_id))
            .tempdir_in(&self.config.work_dir)?;

        let ctx = RunContext {
            job_id,
            request,
            composition: CompositionConfig::for_platform(request.platform),
            progress: Arc::new(ProgressReporter::new(progress)),
            cancel,
            scratch: scratch.path(),
        };

        let result = self.run(&ctx).await;

        let scratch_path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            warn!(job_id = %job_id, path = %scratch_path.display(), "Failed to remove scratch directory: {}", e);
        }
        result
    }

    async fn run(&self, ctx: &RunContext<'_>) -> WorkerResult<JobResult> {
        ctx.checkpoint()?;
        ctx.progress.stage(Stage::Segmenting, 0.0, "Segmenting script");
        let scenes = self.segmenter.segment_request(ctx.request)?;
        info!(job_id = %ctx.job_id, scenes = scenes.len(), "Script segmented");
        ctx.progress.stage(
            Stage::Segmenting,
            1.0,
            format!("Split script into {} scenes", scenes.len()),
        );

        let scenes = self.resolve_scenes(ctx, scenes).await?;
        let segments = self.compose_scenes(ctx, &scenes).await?;
        let assembled = self.assemble(ctx, &scenes, segments).await?;
        self.finalize(ctx, assembled).await
    }

    async fn resolve_scenes(&self, ctx: &RunContext<'_>, scenes: Vec<Scene>) -> WorkerResult<Vec<Scene>> {
        ctx.checkpoint()?;
        let total = scenes.len();
        ctx.progress
            .stage(Stage::Resolving, 0.0, "Synthesizing narration and resolving visuals");

        let mut resolved = Vec::with_capacity(total);
        let mut pending = stream::iter(scenes)
            .map(|scene| self.resolve_scene(ctx, scene))
            .buffer_unordered(self.config.max_scene_parallel.max(1));

        while let Some(scene) = pending.next().await {
            resolved.push(scene?);
            ctx.checkpoint()?;
            ctx.progress.stage(
                Stage::Resolving,
                resolved.len() as f64 / total as f64,
                format!("Resolved scene {}/{}", resolved.len(), total),
            );
        }

        resolved.sort_by_key(|s| s.index);
        Ok(resolved)
    }

    async fn resolve_scene(&self, ctx: &RunContext<'_>, mut scene: Scene) -> WorkerResult<Scene> {
        let speech_request = SpeechRequest::new(scene.text.clone(), ctx.request.language.clone())
            .with_voice(ctx.request.voice.clone());
        let stem = ctx.scratch.join(format!("voice_{:04}", scene.index));

        let (visual, speech) = tokio::try_join!(
            async { self.visuals.resolve(&scene.keywords).await.map_err(WorkerError::from) },
            async {
                self.speech
                    .synthesize(&speech_request, &stem)
                    .await
                    .map_err(WorkerError::from)
            },
        )?;
        let audio_secs = self
            .renderer
            .measure_audio(&speech.path, ctx.cancel.clone())
            .await?;

        debug!(
            job_id = %ctx.job_id,
            scene = scene.index,
            provider = %speech.provider,
            audio_secs,
            "Scene resolved"
        );

        // narration length wins; the visual is held for as long as it plays
        scene.duration_secs = audio_secs.min(self.segmenter.config().max_scene_secs);
        scene.visual = Some(visual);
        scene.audio = Some(speech.path);
        scene.audio_duration_secs = Some(audio_secs);
        Ok(scene)
    }

    async fn compose_scenes(&self, ctx: &RunContext<'_>, scenes: &[Scene]) -> WorkerResult<Vec<SegmentArtifact>> {
        let total = scenes.len();
        let mut segments = Vec::with_capacity(total);

        for (i, scene) in scenes.iter().enumerate() {
            ctx.checkpoint()?;
            let sink = ctx.progress.media_sink(
                Stage::Composing,
                i as f64 / total as f64,
                (i + 1) as f64 / total as f64,
                format!("Composing scene {}/{}", i + 1, total),
            );
            let segment = self
                .renderer
                .compose(scene, &ctx.composition, ctx.scratch, ctx.cancel.clone(), sink)
                .await?;
            segments.push(segment);
            ctx.progress.stage(
                Stage::Composing,
                segments.len() as f64 / total as f64,
                format!("Composed scene {}/{}", segments.len(), total),
            );
        }
        Ok(segments)
    }

    async fn assemble(
        &self,
        ctx: &RunContext<'_>,
        scenes: &[Scene],
        segments: Vec<SegmentArtifact>,
    ) -> WorkerResult<AssemblyOutput> {
        ctx.checkpoint()?;
        ctx.progress.stage(Stage::Assembling, 0.0, "Assembling timeline");

        let transitions = transition_specs(scenes);
        let output = ctx.scratch.join("final.mp4");
        let sink = ctx.progress.media_sink(Stage::Assembling, 0.0, 1.0, "Assembling timeline");
        let assembled = self
            .renderer
            .assemble(&segments, &transitions, &ctx.composition, &output, ctx.cancel.clone(), sink)
            .await?;

        for segment in &segments {
            remove_quietly(&segment.path).await;
        }

        ctx.progress.stage(
            Stage::Assembling,
            1.0,
            format!("Assembled {:.1}s video", assembled.metadata.duration_secs),
        );
        Ok(assembled)
    }

    async fn finalize(&self, ctx: &RunContext<'_>, assembled: AssemblyOutput) -> WorkerResult<JobResult> {
        ctx.checkpoint()?;
        ctx.progress.stage(Stage::Finalizing, 0.0, "Publishing artifacts");

        let dest = job_output_dir(&self.config.output_dir, ctx.job_id);
        let video_path = dest.join(VIDEO_FILE_NAME);
        let thumbnail_path = dest.join(THUMBNAIL_FILE_NAME);

        let published = async {
            move_file(&assembled.video_path, &video_path).await?;
            move_file(&assembled.thumbnail_path, &thumbnail_path).await?;
            Ok::<(), MediaError>(())
        }
        .await;
        if let Err(e) = published {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dest).await {
                debug!(path = %dest.display(), "Output cleanup failed: {}", cleanup);
            }
            return Err(e.into());
        }

        ctx.progress.stage(Stage::Finalizing, 1.0, "Done");
        Ok(JobResult {
            video_path,
            thumbnail_path,
            metadata: assembled.metadata,
        })
    }
}
