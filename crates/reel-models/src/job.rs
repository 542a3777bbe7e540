//! Job records and the job state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::request::GenerationRequest;
use crate::video::VideoMetadata;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the string has the shape of a generated job ID.
    pub fn is_valid(s: &str) -> bool {
        Uuid::parse_str(s).is_ok()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle status.
///
/// ```text
/// pending -> started -> processing -> success | failure | cancelled
/// ```
/// `started`/`processing` may fall back to `pending` when an attempt is
/// retried. Any non-terminal status may move to `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Started,
    Processing,
    Success,
    Failure,
    Cancelled,
}

impl JobStatus {
    pub const ALL: &'static [JobStatus] = &[
        JobStatus::Pending,
        JobStatus::Started,
        JobStatus::Processing,
        JobStatus::Success,
        JobStatus::Failure,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Started => "started",
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure | JobStatus::Cancelled)
    }

    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine permits `self -> next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Started)
                | (Started, Processing)
                | (Processing, Success)
                | (Started | Processing, Failure)
                | (Started | Processing, Pending)
                | (Pending | Started | Processing, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s.to_lowercase())
            .ok_or_else(|| JobStatusParseError(s.to_string()))
    }
}

#[derive(Debug, Error)]
#[error("Unknown job status: {0}")]
pub struct JobStatusParseError(String);

/// Rejected state machine transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid job transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// A recorded status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatusTransition {
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
}

/// Artifacts of a successful job. Paths are server-local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    pub video_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub metadata: VideoMetadata,
}

/// A video generation job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Job {
    pub id: JobId,

    pub request: GenerationRequest,

    #[serde(default)]
    pub status: JobStatus,

    /// Progress fraction (0.0-1.0) of the current attempt
    #[serde(default)]
    pub progress: f64,

    #[serde(default)]
    pub progress_message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,

    /// Human readable error of the last failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default)]
    pub retry_count: u32,

    /// Total attempts allowed, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub transitions: Vec<StatusTransition>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_max_attempts() -> u32 {
    3
}

impl Job {
    /// Create a pending job for a validated request.
    pub fn new(request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            request,
            status: JobStatus::Pending,
            progress: 0.0,
            progress_message: "Queued".to_string(),
            result: None,
            error: None,
            retry_count: 0,
            max_attempts: default_max_attempts(),
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn requester(&self) -> &str {
        &self.request.requester
    }

    /// Apply a status change, recording it in the transition history.
    pub fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError { from: self.status, to });
        }
        let now = Utc::now();
        self.transitions.push(StatusTransition {
            from: self.status,
            to,
            at: now,
        });
        self.status = to;
        self.updated_at = now;

        match to {
            JobStatus::Started => {
                self.started_at = Some(now);
                self.progress = 0.0;
                self.progress_message = "Starting".to_string();
            }
            JobStatus::Pending => {
                self.progress = 0.0;
                self.progress_message = "Waiting for retry".to_string();
            }
            _ if to.is_terminal() => self.completed_at = Some(now),
            _ => {}
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Started)
    }

    pub fn complete(&mut self, result: JobResult) -> Result<(), TransitionError> {
        self.transition(JobStatus::Success)?;
        self.result = Some(result);
        self.error = None;
        self.progress = 1.0;
        self.progress_message = "Done".to_string();
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failure)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        self.transition(JobStatus::Cancelled)?;
        self.progress_message = "Cancelled".to_string();
        Ok(())
    }

    /// Return the job to the queue for another attempt.
    pub fn requeue_for_retry(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Pending)?;
        self.retry_count += 1;
        self.error = Some(error.into());
        Ok(())
    }

    /// Whether another attempt is allowed after the current one.
    pub fn can_retry(&self) -> bool {
        self.retry_count + 1 < self.max_attempts
    }

    /// Record progress, keeping the fraction monotonic within an attempt.
    ///
    /// The first update moves a started job to processing. Updates on jobs
    /// that are not running are ignored and return `false`.
    pub fn record_progress(&mut self, fraction: f64, message: impl Into<String>) -> bool {
        match self.status {
            JobStatus::Started => {
                if self.transition(JobStatus::Processing).is_err() {
                    return false;
                }
            }
            JobStatus::Processing => {}
            _ => return false,
        }
        self.progress = self.progress.max(fraction.clamp(0.0, 1.0));
        self.progress_message = message.into();
        self.updated_at = Utc::now();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(GenerationRequest::new("user123", "Hello there. General Kenobi."))
    }

    #[test]
    fn test_job_creation() {
        let job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_attempts, 3);
        assert!(JobId::is_valid(job.id.as_str()));
        assert!(!JobId::is_valid("not-a-uuid"));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = job();
        job.start().unwrap();
        assert!(job.started_at.is_some());

        assert!(job.record_progress(0.05, "Segmenting"));
        assert_eq!(job.status, JobStatus::Processing);

        job.complete(JobResult {
            video_path: "/out/video.mp4".into(),
            thumbnail_path: "/out/thumb.jpg".into(),
            metadata: VideoMetadata::default(),
        })
        .unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.progress, 1.0);
        assert!(job.completed_at.is_some());

        let path: Vec<_> = job.transitions.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            path,
            vec![
                (JobStatus::Pending, JobStatus::Started),
                (JobStatus::Started, JobStatus::Processing),
                (JobStatus::Processing, JobStatus::Success),
            ]
        );
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.cancel().unwrap();
        for next in JobStatus::ALL {
            assert!(job.clone().transition(*next).is_err());
        }
        assert!(!JobStatus::Cancelled.is_cancellable());
    }

    #[test]
    fn test_pending_cannot_succeed_directly() {
        let mut job = job();
        let err = job.transition(JobStatus::Success).unwrap_err();
        assert_eq!(err.from, JobStatus::Pending);
        assert!(job.transitions.is_empty());
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = job();
        job.start().unwrap();
        job.record_progress(0.4, "Composing");
        job.record_progress(0.2, "late update");
        assert_eq!(job.progress, 0.4);
        assert_eq!(job.progress_message, "late update");
    }

    #[test]
    fn test_progress_ignored_when_not_running() {
        let mut job = job();
        assert!(!job.record_progress(0.5, "nope"));
        job.cancel().unwrap();
        assert!(!job.record_progress(0.5, "nope"));
        assert_eq!(job.progress, 0.0);
    }

    #[test]
    fn test_retry_budget() {
        let mut job = job();
        job.start().unwrap();
        assert!(job.can_retry());
        job.requeue_for_retry("provider down").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);

        job.start().unwrap();
        assert!(job.can_retry());
        job.requeue_for_retry("provider down").unwrap();
        job.start().unwrap();
        assert!(!job.can_retry());
        job.fail("gave up").unwrap();
        assert_eq!(job.error.as_deref(), Some("gave up"));
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), *status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }
}
