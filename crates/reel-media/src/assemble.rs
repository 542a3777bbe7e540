//! Timeline assembler: joins segments with transitions into the final video.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::{acrossfade_filter, xfade_filter};
use crate::fs_utils::{move_file, partial_path, remove_quietly};
use crate::thumbnail::{generate_thumbnail, thumbnail_position};
use reel_models::{CompositionConfig, SegmentArtifact, TransitionSpec, VideoMetadata};

/// Final artifacts of an assembled timeline.
#[derive(Debug, Clone)]
pub struct AssemblyOutput {
    pub video_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub metadata: VideoMetadata,
}

/// Filter graph joining N inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelinePlan {
    pub filter: String,
    pub video_label: String,
    pub audio_label: String,
    /// Expected output length in seconds
    pub duration: f64,
}

/// Blend length actually used between two segments.
///
/// A blend never consumes more than half of either neighbour.
pub fn effective_blend(spec: &TransitionSpec, left_secs: f64, right_secs: f64) -> f64 {
    if spec.kind.is_cut() {
        return 0.0;
    }
    spec.blend_secs.min(left_secs / 2.0).min(right_secs / 2.0).max(0.0)
}

/// Plan the filter graph for `durations.len() >= 2` segments.
///
/// Cuts are joined with `concat`; every other transition overlaps the tail of
/// the running timeline with the head of the next segment via `xfade` and
/// `acrossfade`, starting at `running_length - blend`.
pub fn plan_timeline(durations: &[f64], transitions: &[TransitionSpec]) -> TimelinePlan {
    let mut parts = Vec::with_capacity(durations.len() * 4);
    for i in 0..durations.len() {
        parts.push(format!("[{i}:v]settb=AVTB,setpts=PTS-STARTPTS[v{i}]"));
        parts.push(format!("[{i}:a]asetpts=PTS-STARTPTS[a{i}]"));
    }

    let mut video = "v0".to_string();
    let mut audio = "a0".to_string();
    let mut total = durations.first().copied().unwrap_or(0.0);

    for i in 1..durations.len() {
        let spec = transitions.get(i - 1).copied().unwrap_or_else(TransitionSpec::cut);
        let blend = effective_blend(&spec, durations[i - 1], durations[i]);
        let next_video = format!("vx{i}");
        let next_audio = format!("ax{i}");

        if blend <= f64::EPSILON {
            parts.push(format!("[{video}][v{i}]concat=n=2:v=1:a=0[{next_video}]"));
            parts.push(format!("[{audio}][a{i}]concat=n=2:v=0:a=1[{next_audio}]"));
            total += durations[i];
        } else {
            let offset = total - blend;
            parts.push(format!(
                "[{video}][v{i}]{}[{next_video}]",
                xfade_filter(spec.kind, blend, offset)
            ));
            parts.push(format!("[{audio}][a{i}]{}[{next_audio}]", acrossfade_filter(blend)));
            total += durations[i] - blend;
        }

        video = next_video;
        audio = next_audio;
    }

    TimelinePlan {
        filter: parts.join(";"),
        video_label: format!("[{video}]"),
        audio_label: format!("[{audio}]"),
        duration: total,
    }
}

/// Build the FFmpeg command that renders the timeline into `output`.
pub fn build_assembly_command(
    segments: &[SegmentArtifact],
    transitions: &[TransitionSpec],
    config: &CompositionConfig,
    output: &Path,
) -> (FfmpegCommand, f64) {
    let mut cmd = FfmpegCommand::new(output);
    for segment in segments {
        cmd = cmd.input_file(&segment.path);
    }

    if segments.len() == 1 {
        let duration = segments[0].duration_secs;
        let cmd = cmd.map("0:v").map("0:a").output_arg("-c").output_arg("copy").faststart();
        return (cmd, duration);
    }

    let durations: Vec<f64> = segments.iter().map(|s| s.duration_secs).collect();
    let plan = plan_timeline(&durations, transitions);
    let cmd = cmd
        .filter_complex(plan.filter)
        .map(plan.video_label)
        .map(plan.audio_label)
        .encoding(config)
        .faststart();
    (cmd, plan.duration)
}

/// Concatenate `segments` in order into `output_path`.
///
/// The video and its thumbnail (`output_path` with a `.jpg` extension) are
/// rendered to hidden partial files and only renamed into place once both
/// exist and the video probes cleanly.
pub async fn assemble(
    segments: &[SegmentArtifact],
    transitions: &[TransitionSpec],
    config: &CompositionConfig,
    output_path: &Path,
    runner: &FfmpegRunner,
) -> MediaResult<AssemblyOutput> {
    if segments.is_empty() {
        return Err(MediaError::assembly("no segments to assemble"));
    }
    if transitions.len() != segments.len() - 1 {
        return Err(MediaError::assembly(format!(
            "expected {} transitions for {} segments, got {}",
            segments.len() - 1,
            segments.len(),
            transitions.len()
        )));
    }
    if let Some(missing) = segments.iter().find(|s| !s.path.exists()) {
        return Err(MediaError::assembly(format!(
            "segment {} missing at {}",
            missing.scene_index,
            missing.path.display()
        )));
    }

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| MediaError::from(e).into_assembly())?;
    }

    let video_partial = partial_path(output_path);
    let thumbnail_path = output_path.with_extension("jpg");
    let thumbnail_partial = partial_path(&thumbnail_path);

    let result = render_partials(
        segments,
        transitions,
        config,
        &video_partial,
        &thumbnail_partial,
        runner,
    )
    .await;

    let metadata = match result {
        Ok(metadata) => metadata,
        Err(e) => {
            remove_quietly(&video_partial).await;
            remove_quietly(&thumbnail_partial).await;
            return Err(e.into_assembly());
        }
    };

    if let Err(e) = publish(&video_partial, output_path, &thumbnail_partial, &thumbnail_path).await {
        for path in [&video_partial, &thumbnail_partial, &output_path.to_path_buf(), &thumbnail_path] {
            remove_quietly(path).await;
        }
        return Err(e.into_assembly());
    }

    info!(
        "Assembled {} segments -> {} ({:.2}s, {} bytes)",
        segments.len(),
        output_path.display(),
        metadata.duration_secs,
        metadata.file_size_bytes
    );

    Ok(AssemblyOutput {
        video_path: output_path.to_path_buf(),
        thumbnail_path,
        metadata,
    })
}

async fn render_partials(
    segments: &[SegmentArtifact],
    transitions: &[TransitionSpec],
    config: &CompositionConfig,
    video_partial: &Path,
    thumbnail_partial: &Path,
    runner: &FfmpegRunner,
) -> MediaResult<VideoMetadata> {
    let (cmd, planned) = build_assembly_command(segments, transitions, config, video_partial);
    info!("Assembling {} segments ({:.2}s planned)", segments.len(), planned);
    runner.run(&cmd).await?;

    let info = runner.prober().probe(video_partial).await?;
    if !info.has_video() {
        return Err(MediaError::assembly("assembled file has no video stream"));
    }

    generate_thumbnail(
        video_partial,
        thumbnail_partial,
        thumbnail_position(info.duration),
        &runner.without_progress(),
    )
    .await?;
    if !thumbnail_partial.exists() {
        return Err(MediaError::assembly("thumbnail was not written"));
    }

    Ok(info.to_metadata(segments.len() as u32))
}

async fn publish(
    video_partial: &Path,
    video: &Path,
    thumbnail_partial: &Path,
    thumbnail: &Path,
) -> MediaResult<()> {
    move_file(thumbnail_partial, thumbnail).await?;
    move_file(video_partial, video).await
}
