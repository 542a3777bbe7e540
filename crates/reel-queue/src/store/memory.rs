//! In-process job store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use reel_models::{Job, JobId};

use super::{is_expired, paginate, retention_cutoff, JobFilter, JobPage, JobStore};
use crate::error::{QueueError, QueueResult};

/// Job store backed by a map; contents are lost on restart.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(QueueError::DuplicateJob(job.id.to_string()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn put(&self, job: &Job) -> QueueResult<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(QueueError::not_found(&job.id)),
        }
    }

    async fn list(&self, filter: &JobFilter) -> QueueResult<JobPage> {
        let jobs = self.jobs.read().await;
        Ok(paginate(jobs.values().cloned(), filter))
    }

    async fn evict_expired(&self, retention: Duration) -> QueueResult<Vec<Job>> {
        let cutoff = retention_cutoff(retention);
        let mut jobs = self.jobs.write().await;
        let expired: Vec<JobId> = jobs
            .values()
            .filter(|j| is_expired(j, cutoff))
            .map(|j| j.id.clone())
            .collect();
        Ok(expired.iter().filter_map(|id| jobs.remove(id)).collect())
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
