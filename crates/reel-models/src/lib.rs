//! Shared data models for the Reelforge video generation service.
//!
//! This crate provides Serde-serializable types for:
//! - Generation requests and platform presets
//! - Scenes, transitions and text overlays
//! - Jobs and the job state machine
//! - Segment composition configuration
//! - Job event schemas

pub mod encoding;
pub mod event;
pub mod job;
pub mod request;
pub mod scene;
pub mod video;

// Re-export common types
pub use encoding::{CompositionConfig, LetterboxMode};
pub use event::{JobEvent, JobEventKind};
pub use job::{Job, JobId, JobResult, JobStatus, StatusTransition, TransitionError};
pub use request::{GenerationRequest, PlatformPreset, Priority};
pub use scene::{
    OverlayPosition, OverlayStyle, Scene, SegmentArtifact, TextOverlay, Transition, TransitionSpec,
};
pub use video::VideoMetadata;
