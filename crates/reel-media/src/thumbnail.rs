//! Thumbnail extraction.

use std::path::Path;

use crate::command::{FfmpegCommand, FfmpegInput, FfmpegRunner};
use crate::error::MediaResult;
use crate::filters::thumbnail_filter;
use reel_models::encoding::THUMBNAIL_SCALE_WIDTH;

/// Position of the thumbnail frame: the first quarter of the timeline.
pub fn thumbnail_position(duration_secs: f64) -> f64 {
    (duration_secs.max(0.0) / 4.0).max(0.0)
}

pub fn build_thumbnail_command(video_path: &Path, output_path: &Path, at_secs: f64) -> FfmpegCommand {
    FfmpegCommand::new(output_path)
        .input(FfmpegInput::file(video_path).seek(at_secs))
        .single_frame()
        .video_filter(thumbnail_filter(THUMBNAIL_SCALE_WIDTH))
        .output_arg("-q:v")
        .output_arg("3")
        .output_arg("-update")
        .output_arg("1")
}

/// Extract one frame at `at_secs` as a JPEG.
pub async fn generate_thumbnail(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    at_secs: f64,
    runner: &FfmpegRunner,
) -> MediaResult<()> {
    let cmd = build_thumbnail_command(video_path.as_ref(), output_path.as_ref(), at_secs);
    runner.run(&cmd).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_position() {
        assert_eq!(thumbnail_position(20.0), 5.0);
        assert_eq!(thumbnail_position(-1.0), 0.0);
    }

    #[test]
    fn test_thumbnail_command_seeks_before_input() {
        let args = build_thumbnail_command(Path::new("v.mp4"), Path::new("t.jpg"), 2.5).build_args();
        let seek = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "v.mp4").unwrap();
        assert!(seek < input);
        assert!(args.contains(&"scale=480:-2".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-frames:v" && w[1] == "1"));
    }
}
