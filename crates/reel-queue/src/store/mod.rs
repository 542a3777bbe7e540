//! Job persistence.

mod memory;
mod redis_store;

pub use memory::MemoryJobStore;
pub use redis_store::RedisJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use reel_models::{Job, JobId, JobStatus};

use crate::error::QueueResult;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Listing criteria. Pages are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFilter {
    pub requester: Option<String>,
    pub status: Option<JobStatus>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            requester: None,
            status: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl JobFilter {
    pub fn for_requester(requester: impl Into<String>) -> Self {
        Self {
            requester: Some(requester.into()),
            ..Default::default()
        }
    }

    fn matches(&self, job: &Job) -> bool {
        self.requester.as_deref().map_or(true, |r| job.requester() == r)
            && self.status.map_or(true, |s| job.status == s)
    }
}

/// One page of jobs, newest first.
#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
}

/// Persistent job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Store a new job; fails if the id is taken.
    async fn insert(&self, job: &Job) -> QueueResult<()>;

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>>;

    /// Overwrite an existing job record.
    async fn put(&self, job: &Job) -> QueueResult<()>;

    async fn list(&self, filter: &JobFilter) -> QueueResult<JobPage>;

    /// Remove terminal jobs completed more than `retention` ago and return them.
    async fn evict_expired(&self, retention: Duration) -> QueueResult<Vec<Job>>;

    /// Cheap liveness check for readiness probes.
    async fn ping(&self) -> QueueResult<()>;

    fn backend(&self) -> &'static str;
}

/// Filter, sort newest first and slice out the requested page.
pub(crate) fn paginate(jobs: impl IntoIterator<Item = Job>, filter: &JobFilter) -> JobPage {
    let mut matching: Vec<Job> = jobs.into_iter().filter(|j| filter.matches(j)).collect();
    matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.0.cmp(&b.id.0)));

    let page = filter.page.max(1);
    let page_size = filter.page_size.clamp(1, MAX_PAGE_SIZE);
    let total = matching.len();
    let jobs = matching
        .into_iter()
        .skip((page as usize - 1).saturating_mul(page_size as usize))
        .take(page_size as usize)
        .collect();

    JobPage {
        jobs,
        total,
        page,
        page_size,
    }
}

pub(crate) fn is_expired(job: &Job, cutoff: DateTime<Utc>) -> bool {
    job.status.is_terminal() && job.completed_at.map_or(false, |at| at < cutoff)
}

pub(crate) fn retention_cutoff(retention: Duration) -> DateTime<Utc> {
    let retention = chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(36_500));
    Utc::now()
        .checked_sub_signed(retention)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::GenerationRequest;

    fn job(requester: &str, offset_secs: i64) -> Job {
        let mut job = Job::new(GenerationRequest::new(requester, "Hi."));
        job.created_at = job.created_at + chrono::Duration::seconds(offset_secs);
        job
    }

    #[test]
    fn test_paginate_sorts_newest_first() {
        let jobs = vec![job("a", 0), job("a", 10), job("a", 5)];
        let page = paginate(jobs, &JobFilter::default());
        let offsets: Vec<_> = page.jobs.iter().map(|j| j.created_at).collect();
        let mut sorted = offsets.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(offsets, sorted);
        assert_eq!(page.total, 3);
    }

    #[test]
    fn test_paginate_filters_and_slices() {
        let jobs: Vec<Job> = (0..25).map(|i| job(if i % 5 == 0 { "b" } else { "a" }, i)).collect();
        let filter = JobFilter {
            requester: Some("a".into()),
            page: 2,
            page_size: 15,
            ..Default::default()
        };
        let page = paginate(jobs, &filter);
        assert_eq!(page.total, 20);
        assert_eq!(page.jobs.len(), 5);
        assert!(page.jobs.iter().all(|j| j.requester() == "a"));
    }

    #[test]
    fn test_paginate_clamps_bounds() {
        let filter = JobFilter {
            page: 0,
            page_size: 10_000,
            ..Default::default()
        };
        let page = paginate(vec![job("a", 0)], &filter);
        assert_eq!(page.page, 1);
        assert_eq!(page.page_size, MAX_PAGE_SIZE);
    }

    #[test]
    fn test_only_old_terminal_jobs_expire() {
        let cutoff = Utc::now();
        let mut done = job("a", 0);
        done.start().unwrap();
        done.cancel().unwrap();
        done.completed_at = Some(cutoff - chrono::Duration::seconds(1));
        assert!(is_expired(&done, cutoff));

        let pending = job("a", -100);
        assert!(!is_expired(&pending, cutoff));
    }
}
