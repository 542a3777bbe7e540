//! FFmpeg CLI wrapper for video generation.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - A supervised runner with progress parsing, stderr capture,
//!   cancellation and timeouts
//! - Scene composition (visual + narration + overlay -> segment)
//! - Timeline assembly with cut/xfade transitions, thumbnail and metadata
//! - The `Renderer` seam used by the generation pipeline

pub mod assemble;
pub mod command;
pub mod compose;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod probe;
pub mod progress;
pub mod render;
pub mod thumbnail;

pub use assemble::{assemble, AssemblyOutput};
pub use command::{
    check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegInput, FfmpegRunner, MediaProgress, SubprocessTimeouts,
};
pub use compose::compose_segment;
pub use error::{MediaError, MediaResult};
pub use probe::{MediaInfo, Prober};
pub use progress::FfmpegProgress;
pub use render::{FfmpegRenderer, Renderer};
pub use thumbnail::generate_thumbnail;
