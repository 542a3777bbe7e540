//! Provider error types.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failure of a single external provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider misconfigured: {0}")]
    Config(String),

    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Server error {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("{program} failed: {message}")]
    CommandFailed {
        program: String,
        message: String,
        stderr: Option<String>,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    /// Map a non-success HTTP status to an error.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => ProviderError::Unauthorized(body),
            429 => ProviderError::RateLimited(body),
            500..=599 => ProviderError::ServerError { status, body },
            _ => ProviderError::RequestFailed(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Whether the same call could succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::ServerError { .. }
                | ProviderError::Timeout(_)
                | ProviderError::Network(_)
                | ProviderError::Unavailable(_)
        )
    }
}

pub type SpeechResult<T> = Result<T, SpeechError>;

/// Failure of the speech synthesis stage as a whole.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("No speech providers configured")]
    NoProviders,

    #[error("All {attempts} speech providers failed; last ({provider}): {last}")]
    AllProvidersFailed {
        attempts: usize,
        provider: String,
        #[source]
        last: ProviderError,
    },

    #[error("Failed to store synthesized audio: {0}")]
    Io(#[from] std::io::Error),
}
