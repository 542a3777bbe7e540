//! Structured job logging.

use tracing::{error, info, warn, Span};

use reel_models::JobId;

/// Consistent lifecycle lines for one job attempt.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    attempt: u32,
}

impl JobLogger {
    /// `attempt` is 1-based.
    pub fn new(job_id: &JobId, attempt: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            attempt,
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, attempt = self.attempt, "Job started: {}", message);
    }

    pub fn log_progress(&self, fraction: f64, message: &str) {
        info!(
            job_id = %self.job_id,
            attempt = self.attempt,
            progress = format!("{:.0}%", fraction * 100.0),
            "Job progress: {}", message
        );
    }

    pub fn log_retry(&self, delay_ms: u128, message: &str) {
        warn!(
            job_id = %self.job_id,
            attempt = self.attempt,
            delay_ms = delay_ms as u64,
            "Job attempt failed, retrying: {}", message
        );
    }

    pub fn log_cancelled(&self) {
        info!(job_id = %self.job_id, attempt = self.attempt, "Job cancelled");
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, attempt = self.attempt, "Job failed: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(job_id = %self.job_id, attempt = self.attempt, "Job completed: {}", message);
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, attempt = self.attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, 2);
        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.attempt(), 2);
    }
}
