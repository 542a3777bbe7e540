//! Video generation worker.
//!
//! This crate provides:
//! - Script segmentation into timed scenes
//! - The generation pipeline (narration, visuals, composition, assembly)
//! - The job manager: worker pool, retries, cancellation and retention
//! - Structured job logging

pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod pipeline;
pub mod retry;
pub mod segmenter;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use manager::JobManager;
pub use pipeline::{Generator, PipelineConfig, ProgressCallback, Stage};
pub use retry::RetryPolicy;
pub use segmenter::{SegmentError, SegmentOptions, Segmenter, SegmenterConfig};
