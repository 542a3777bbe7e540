//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Composition of scene {scene_index} failed: {message}")]
    Composition {
        scene_index: u32,
        message: String,
        stderr: Option<String>,
    },

    #[error("Assembly failed: {message}")]
    Assembly {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid media file: {0}")]
    InvalidMedia(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create an assembly error without subprocess output.
    pub fn assembly(message: impl Into<String>) -> Self {
        Self::Assembly {
            message: message.into(),
            stderr: None,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Errors that keep their own variant when wrapped by a stage.
    fn passes_through(&self) -> bool {
        matches!(
            self,
            MediaError::Cancelled | MediaError::FfmpegNotFound | MediaError::FfprobeNotFound
        )
    }

    /// Wrap a runner failure as a scene composition error.
    ///
    /// Cancellation and missing binaries pass through untouched.
    pub fn into_composition(self, scene_index: u32) -> Self {
        if self.passes_through() {
            return self;
        }
        match self {
            MediaError::Composition { .. } => self,
            MediaError::FfmpegFailed { message, stderr, .. } => MediaError::Composition {
                scene_index,
                message,
                stderr,
            },
            other => MediaError::Composition {
                scene_index,
                message: other.to_string(),
                stderr: None,
            },
        }
    }

    /// Wrap a runner failure as an assembly error.
    pub fn into_assembly(self) -> Self {
        if self.passes_through() {
            return self;
        }
        match self {
            MediaError::Assembly { .. } => self,
            MediaError::FfmpegFailed { message, stderr, .. } => MediaError::Assembly { message, stderr },
            other => MediaError::Assembly {
                message: other.to_string(),
                stderr: None,
            },
        }
    }

    /// Captured subprocess stderr, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::FfmpegFailed { stderr, .. }
            | MediaError::FfprobeFailed { stderr, .. }
            | MediaError::Composition { stderr, .. }
            | MediaError::Assembly { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MediaError::Cancelled)
    }

    /// Whether a fresh attempt could succeed.
    ///
    /// Missing binaries need an operator, not a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            MediaError::Cancelled | MediaError::FfmpegNotFound | MediaError::FfprobeNotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_composition_keeps_stderr() {
        let err = MediaError::ffmpeg_failed("exit 1", Some("Invalid argument".into()), Some(1))
            .into_composition(3);
        match &err {
            MediaError::Composition { scene_index, stderr, .. } => {
                assert_eq!(*scene_index, 3);
                assert_eq!(stderr.as_deref(), Some("Invalid argument"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.stderr(), Some("Invalid argument"));
    }

    #[test]
    fn test_cancel_passes_through() {
        assert!(MediaError::Cancelled.into_composition(0).is_cancelled());
        assert!(MediaError::Cancelled.into_assembly().is_cancelled());
    }

    #[test]
    fn test_retryable() {
        assert!(MediaError::Timeout(30).is_retryable());
        assert!(MediaError::assembly("boom").is_retryable());
        assert!(!MediaError::FfmpegNotFound.is_retryable());
        assert!(!MediaError::Cancelled.is_retryable());
    }

    #[test]
    fn test_missing_binaries_stay_fatal_when_wrapped() {
        let composed = MediaError::FfmpegNotFound.into_composition(2);
        assert!(matches!(composed, MediaError::FfmpegNotFound));
        assert!(!composed.is_retryable());

        let assembled = MediaError::FfprobeNotFound.into_assembly();
        assert!(matches!(assembled, MediaError::FfprobeNotFound));
        assert!(!assembled.is_retryable());
    }
}
