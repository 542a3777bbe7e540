//! Job events pushed to subscribers (WebSocket, Redis pub/sub).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus};

/// Event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventKind {
    /// Progress update (fraction 0.0-1.0)
    Progress { fraction: f64, message: String },

    /// Status change
    Status {
        status: JobStatus,
        retry_count: u32,
    },

    /// Attempt failed; `retrying` tells whether the job was re-queued
    Error { message: String, retrying: bool },

    /// Job finished successfully
    Done { duration_secs: f64 },
}

/// Event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobEvent {
    pub job_id: JobId,
    #[serde(flatten)]
    pub kind: JobEventKind,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: JobId, kind: JobEventKind) -> Self {
        Self {
            job_id,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn progress(job_id: JobId, fraction: f64, message: impl Into<String>) -> Self {
        Self::new(
            job_id,
            JobEventKind::Progress {
                fraction,
                message: message.into(),
            },
        )
    }

    pub fn status(job_id: JobId, status: JobStatus, retry_count: u32) -> Self {
        Self::new(job_id, JobEventKind::Status { status, retry_count })
    }

    pub fn error(job_id: JobId, message: impl Into<String>, retrying: bool) -> Self {
        Self::new(
            job_id,
            JobEventKind::Error {
                message: message.into(),
                retrying,
            },
        )
    }

    pub fn done(job_id: JobId, duration_secs: f64) -> Self {
        Self::new(job_id, JobEventKind::Done { duration_secs })
    }

    /// Whether no further events follow for this job.
    pub fn is_final(&self) -> bool {
        match &self.kind {
            JobEventKind::Status { status, .. } => status.is_terminal(),
            JobEventKind::Done { .. } => true,
            _ => false,
        }
    }
}
