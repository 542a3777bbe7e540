//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use reel_media::SubprocessTimeouts;

use crate::retry::RetryPolicy;
use crate::segmenter::SegmenterConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed concurrently
    pub pool_size: usize,
    /// Scenes resolved (speech + visual) in parallel within a job
    pub max_scene_parallel: usize,
    pub retry: RetryPolicy,
    /// Parent of per-job scratch directories
    pub work_dir: PathBuf,
    /// Final artifacts land in `{output_dir}/{job_id}/`
    pub output_dir: PathBuf,
    /// How long terminal jobs are kept
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub ffmpeg_timeouts: SubprocessTimeouts,
    pub segmenter: SegmenterConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            max_scene_parallel: 4,
            retry: RetryPolicy::default(),
            work_dir: std::env::temp_dir().join("reel"),
            output_dir: PathBuf::from("./output"),
            retention: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(300),
            ffmpeg_timeouts: SubprocessTimeouts::default(),
            segmenter: SegmenterConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            pool_size: env_parse("WORKER_POOL_SIZE").unwrap_or(defaults.pool_size).max(1),
            max_scene_parallel: env_parse("WORKER_MAX_SCENE_PARALLEL")
                .unwrap_or(defaults.max_scene_parallel)
                .max(1),
            retry: RetryPolicy {
                max_attempts: env_parse("WORKER_MAX_ATTEMPTS")
                    .unwrap_or(defaults.retry.max_attempts)
                    .max(1),
                base_delay: env_parse("WORKER_RETRY_BASE_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
                max_delay: env_parse("WORKER_RETRY_MAX_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.max_delay),
            },
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            output_dir: std::env::var("WORKER_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            retention: env_parse("JOB_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
            sweep_interval: env_parse("JOB_SWEEP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            ffmpeg_timeouts: SubprocessTimeouts {
                base_secs: env_parse("FFMPEG_TIMEOUT_BASE_SECS").unwrap_or(defaults.ffmpeg_timeouts.base_secs),
                per_media_sec: env_parse("FFMPEG_TIMEOUT_PER_MEDIA_SEC")
                    .unwrap_or(defaults.ffmpeg_timeouts.per_media_sec),
                ceiling_secs: env_parse("FFMPEG_TIMEOUT_CEILING_SECS")
                    .unwrap_or(defaults.ffmpeg_timeouts.ceiling_secs),
            },
            segmenter: SegmenterConfig::from_env(),
        }
    }
}

pub(crate) fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
