//! Redis-backed job store.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, info};

use reel_models::{Job, JobId};

use super::{is_expired, paginate, retention_cutoff, JobFilter, JobPage, JobStore};
use crate::error::{QueueError, QueueResult};

/// Job records as JSON strings plus a sorted-set index scored by creation time.
///
/// Keys: `{prefix}:job:{id}` and `{prefix}:jobs`.
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    prefix: String,
}

impl RedisJobStore {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(format!("{}: {}", redis_url, e)))?;
        let prefix = prefix.into();
        info!(prefix = %prefix, "Connected Redis job store");
        Ok(Self { conn, prefix })
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn index_key(&self) -> String {
        format!("{}:jobs", self.prefix)
    }

    async fn load_all(&self) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.zrevrange(self.index_key(), 0, -1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.job_key(&JobId::from_string(id))).collect();
        let payloads: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        let mut jobs = Vec::with_capacity(payloads.len());
        for payload in payloads.into_iter().flatten() {
            jobs.push(serde_json::from_str(&payload)?);
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(job)?;

        let created: bool = conn.set_nx(self.job_key(&job.id), &payload).await?;
        if !created {
            return Err(QueueError::DuplicateJob(job.id.to_string()));
        }
        conn.zadd::<_, _, _, ()>(self.index_key(), job.id.as_str(), job.created_at.timestamp_millis())
            .await?;

        debug!(job_id = %job.id, "Inserted job");
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(self.job_key(id)).await?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    async fn put(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(job)?;

        // XX: only overwrite existing records
        let updated: Option<String> = redis::cmd("SET")
            .arg(self.job_key(&job.id))
            .arg(&payload)
            .arg("XX")
            .query_async(&mut conn)
            .await?;
        if updated.is_none() {
            return Err(QueueError::not_found(&job.id));
        }
        Ok(())
    }

    async fn list(&self, filter: &JobFilter) -> QueueResult<JobPage> {
        Ok(paginate(self.load_all().await?, filter))
    }

    async fn evict_expired(&self, retention: Duration) -> QueueResult<Vec<Job>> {
        let cutoff = retention_cutoff(retention);
        let expired: Vec<Job> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|j| is_expired(j, cutoff))
            .collect();

        let mut conn = self.conn.clone();
        for job in &expired {
            conn.del::<_, ()>(self.job_key(&job.id)).await?;
            conn.zrem::<_, _, ()>(self.index_key(), job.id.as_str()).await?;
        }
        Ok(expired)
    }

    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_models::{GenerationRequest, JobStatus};

    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_round_trip_against_redis() {
        let prefix = format!("reel-test-{}", JobId::new());
        let store = RedisJobStore::connect(&redis_url(), prefix).await.unwrap();
        store.ping().await.unwrap();

        let mut job = Job::new(GenerationRequest::new("alice", "Hello."));
        store.insert(&job).await.unwrap();
        assert!(matches!(store.insert(&job).await, Err(QueueError::DuplicateJob(_))));

        job.start().unwrap();
        job.cancel().unwrap();
        store.put(&job).await.unwrap();

        let loaded = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Cancelled);
        assert_eq!(store.list(&JobFilter::for_requester("alice")).await.unwrap().total, 1);

        let evicted = store.evict_expired(Duration::ZERO).await.unwrap();
        assert_eq!(evicted.len(), 1);
        assert!(store.get(&job.id).await.unwrap().is_none());
    }
}
