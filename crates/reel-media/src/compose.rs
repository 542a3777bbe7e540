//! Scene compositor: one FFmpeg invocation renders one scene.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::command::{FfmpegCommand, FfmpegInput, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::{drawtext_filter, frame_filter, wrap_overlay_text};
use reel_models::encoding::AUDIO_SAMPLE_RATE;
use reel_models::{CompositionConfig, Scene, SegmentArtifact};

const STILL_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tif", "tiff"];

/// Whether a visual is a still image (looped) rather than a motion clip.
pub fn is_still_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            STILL_IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Output file for a scene inside the scratch directory.
pub fn segment_path(scratch_dir: &Path, scene_index: u32) -> PathBuf {
    scratch_dir.join(format!("segment_{:04}.mp4", scene_index))
}

fn overlay_text_path(scratch_dir: &Path, scene_index: u32) -> PathBuf {
    scratch_dir.join(format!("overlay_{:04}.txt", scene_index))
}

/// Build the FFmpeg command for one scene.
///
/// Input 0 is the visual (held for the whole duration), input 1 the
/// narration. Audio is padded with silence and the output cut at `duration`,
/// so the segment length is exact and narration is never time-stretched.
pub fn build_segment_command(
    visual: &Path,
    audio: &Path,
    overlay_file: Option<&Path>,
    scene: &Scene,
    duration: f64,
    config: &CompositionConfig,
    output: &Path,
) -> FfmpegCommand {
    let visual_input = if is_still_image(visual) {
        FfmpegInput::looped_image(visual, config.fps)
    } else {
        FfmpegInput::looped_video(visual)
    };

    let mut video_chain = frame_filter(config);
    if let (Some(overlay), Some(text_file)) = (&scene.overlay, overlay_file) {
        video_chain.push(',');
        video_chain.push_str(&drawtext_filter(overlay, text_file));
    }

    let graph = format!(
        "[0:v]{video_chain}[v];[1:a]aformat=sample_rates={AUDIO_SAMPLE_RATE}:channel_layouts=stereo,apad[a]"
    );

    FfmpegCommand::new(output)
        .input(visual_input)
        .input_file(audio)
        .filter_complex(graph)
        .map("[v]")
        .map("[a]")
        .duration(duration)
        .encoding(config)
        .faststart()
}

/// Render one scene into a segment file in `scratch_dir`.
///
/// The caller owns the scratch directory and its cleanup.
pub async fn compose_segment(
    scene: &Scene,
    config: &CompositionConfig,
    scratch_dir: &Path,
    runner: &FfmpegRunner,
) -> MediaResult<SegmentArtifact> {
    let index = scene.index;
    let fail = |message: String| MediaError::Composition {
        scene_index: index,
        message,
        stderr: None,
    };

    let visual = scene
        .visual
        .as_deref()
        .ok_or_else(|| fail("scene has no visual".to_string()))?;
    let audio = scene
        .audio
        .as_deref()
        .ok_or_else(|| fail("scene has no narration audio".to_string()))?;
    for input in [visual, audio] {
        if !input.exists() {
            return Err(fail(format!("input not found: {}", input.display())));
        }
    }

    let duration = scene.render_duration();
    if duration <= 0.0 {
        return Err(fail(format!("non-positive duration {:.3}", duration)));
    }

    let overlay_file = match &scene.overlay {
        Some(overlay) => {
            let path = overlay_text_path(scratch_dir, index);
            let text = wrap_overlay_text(&overlay.text, config.width, overlay.style.font_size);
            tokio::fs::write(&path, text).await.map_err(|e| MediaError::from(e).into_composition(index))?;
            Some(path)
        }
        None => None,
    };

    let output = segment_path(scratch_dir, index);
    let cmd = build_segment_command(
        visual,
        audio,
        overlay_file.as_deref(),
        scene,
        duration,
        config,
        &output,
    );

    info!("Composing scene {}: {:.2}s -> {}", index, duration, output.display());
    runner.run(&cmd).await.map_err(|e| e.into_composition(index))?;

    let size = tokio::fs::metadata(&output).await.map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        return Err(fail("FFmpeg produced no output file".to_string()));
    }
    debug!("Scene {} rendered ({} bytes)", index, size);

    Ok(SegmentArtifact {
        scene_index: index,
        path: output,
        duration_secs: duration,
        width: config.width,
        height: config.height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{PlatformPreset, TextOverlay};
    use tempfile::TempDir;

    fn scene() -> Scene {
        let mut scene = Scene::new(2, "A calm lake at dawn.", 5.0);
        scene.visual = Some("/assets/lake.jpg".into());
        scene.audio = Some("/scratch/voice_0002.wav".into());
        scene.audio_duration_secs = Some(3.4);
        scene
    }

    #[test]
    fn test_still_image_detection() {
        assert!(is_still_image(Path::new("a/b.JPG")));
        assert!(is_still_image(Path::new("a/b.png")));
        assert!(!is_still_image(Path::new("a/b.mp4")));
        assert!(!is_still_image(Path::new("a/noext")));
    }

    #[test]
    fn test_segment_command_for_still_image() {
        let scene = scene();
        let config = CompositionConfig::for_platform(PlatformPreset::Tiktok);
        let cmd = build_segment_command(
            scene.visual.as_deref().unwrap(),
            scene.audio.as_deref().unwrap(),
            None,
            &scene,
            scene.render_duration(),
            &config,
            Path::new("/scratch/segment_0002.mp4"),
        );
        let args = cmd.build_args();

        assert!(args.windows(2).any(|w| w[0] == "-loop" && w[1] == "1"));
        assert!(args.windows(2).any(|w| w[0] == "-t" && w[1] == "3.400"));
        let graph = args.iter().find(|a| a.starts_with("[0:v]")).unwrap();
        assert!(graph.contains("crop=1080:1920"));
        assert!(graph.contains("apad[a]"));
        assert!(!graph.contains("drawtext"));
    }

    #[test]
    fn test_segment_command_for_motion_with_overlay() {
        let mut scene = scene();
        scene.visual = Some("/assets/waves.mp4".into());
        scene.overlay = Some(TextOverlay::new("A calm lake at dawn."));
        let config = CompositionConfig::default();
        let cmd = build_segment_command(
            scene.visual.as_deref().unwrap(),
            scene.audio.as_deref().unwrap(),
            Some(Path::new("/scratch/overlay_0002.txt")),
            &scene,
            3.4,
            &config,
            Path::new("/scratch/segment_0002.mp4"),
        );
        let args = cmd.build_args();
        assert!(args.windows(2).any(|w| w[0] == "-stream_loop" && w[1] == "-1"));
        assert!(args.iter().any(|a| a.contains("drawtext=textfile='/scratch/overlay_0002.txt'")));
    }

    #[tokio::test]
    async fn test_missing_inputs_fail_with_composition_error() {
        let dir = TempDir::new().unwrap();
        let err = compose_segment(
            &scene(),
            &CompositionConfig::default(),
            dir.path(),
            &FfmpegRunner::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::Composition { scene_index: 2, .. }));
    }

    #[tokio::test]
    async fn test_unresolved_scene_rejected() {
        let dir = TempDir::new().unwrap();
        let err = compose_segment(
            &Scene::new(0, "text", 2.0),
            &CompositionConfig::default(),
            dir.path(),
            &FfmpegRunner::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("no visual"));
    }
}
