//! Application state.

use std::sync::Arc;

use reel_queue::QueueConfig;
use reel_worker::{Generator, JobManager, WorkerConfig};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jobs: JobManager,
}

impl AppState {
    pub fn new(config: ApiConfig, jobs: JobManager) -> Self {
        Self { config, jobs }
    }

    /// Wire the job manager from environment configuration.
    ///
    /// The manager is returned unstarted; the caller owns its worker pool.
    pub async fn from_env(config: ApiConfig) -> anyhow::Result<Self> {
        let worker_config = WorkerConfig::from_env();
        let queue_config = QueueConfig::from_env();

        let generator = Generator::from_config(&worker_config)?;
        let store = queue_config.build_store().await?;
        let events = queue_config.build_progress()?;

        let jobs = JobManager::new(&worker_config, Arc::new(generator), store, events);
        Ok(Self::new(config, jobs))
    }
}
