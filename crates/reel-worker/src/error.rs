//! Worker error types.

use thiserror::Error;

use crate::segmenter::SegmentError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Segmentation failed: {0}")]
    Segmentation(#[from] SegmentError),

    #[error("Speech synthesis failed: {0}")]
    Speech(#[from] reel_providers::SpeechError),

    #[error("Visual resolution failed: {0}")]
    Visual(#[from] reel_providers::ProviderError),

    #[error("Media error: {0}")]
    Media(#[from] reel_media::MediaError),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Queue error: {0}")]
    Queue(#[from] reel_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether another attempt of the whole job could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Speech(_) | WorkerError::Visual(_) | WorkerError::Io(_) => true,
            WorkerError::Media(e) => e.is_retryable(),
            WorkerError::Validation(_)
            | WorkerError::Segmentation(_)
            | WorkerError::Cancelled
            | WorkerError::Queue(_)
            | WorkerError::Internal(_) => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            WorkerError::Cancelled => true,
            WorkerError::Media(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_media::MediaError;
    use reel_providers::{ProviderError, SpeechError};

    #[test]
    fn test_retry_classification() {
        let exhausted = SpeechError::AllProvidersFailed {
            attempts: 2,
            provider: "espeak".into(),
            last: ProviderError::Timeout(45),
        };
        assert!(WorkerError::from(exhausted).is_retryable());
        assert!(WorkerError::from(MediaError::Timeout(30)).is_retryable());

        assert!(!WorkerError::validation("empty script").is_retryable());
        assert!(!WorkerError::from(SegmentError::EmptyScript).is_retryable());
        assert!(!WorkerError::Cancelled.is_retryable());
        assert!(!WorkerError::from(MediaError::Cancelled).is_retryable());
    }

    #[test]
    fn test_media_cancellation_is_cancellation() {
        assert!(WorkerError::from(MediaError::Cancelled).is_cancelled());
        assert!(!WorkerError::from(MediaError::Timeout(1)).is_cancelled());
    }
}
