//! In-process priority queue and store selection.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use reel_models::{JobId, Priority};

use crate::error::{QueueError, QueueResult};
use crate::progress::ProgressChannel;
use crate::store::{JobStore, MemoryJobStore, RedisJobStore};

/// Where job records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: StoreBackend,
    /// Redis URL
    pub redis_url: String,
    /// Prefix for Redis keys and channels
    pub key_prefix: String,
    /// Buffered events per subscriber before it starts lagging
    pub event_capacity: usize,
    /// Mirror job events to Redis Pub/Sub
    pub publish_events: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "reel".to_string(),
            event_capacity: 256,
            publish_events: false,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let backend = match std::env::var("JOB_STORE").as_deref() {
            Ok("redis") => StoreBackend::Redis,
            _ => StoreBackend::Memory,
        };
        Self {
            backend,
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or_else(|_| "reel".to_string()),
            event_capacity: std::env::var("EVENT_CHANNEL_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(256),
            publish_events: backend == StoreBackend::Redis,
        }
    }

    /// Build the configured job store.
    pub async fn build_store(&self) -> QueueResult<Arc<dyn JobStore>> {
        let store: Arc<dyn JobStore> = match self.backend {
            StoreBackend::Memory => Arc::new(MemoryJobStore::new()),
            StoreBackend::Redis => Arc::new(RedisJobStore::connect(&self.redis_url, &self.key_prefix).await?),
        };
        info!(backend = store.backend(), "Job store ready");
        Ok(store)
    }

    pub fn build_progress(&self) -> QueueResult<ProgressChannel> {
        let channel = ProgressChannel::new(self.event_capacity);
        if self.publish_events {
            channel.with_redis(&self.redis_url, &self.key_prefix)
        } else {
            Ok(channel)
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct QueuedJob {
    priority: Priority,
    seq: u64,
    job_id: JobId,
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: higher priority first, then lower sequence number
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<QueuedJob>,
    next_seq: u64,
    closed: bool,
}

/// Priority queue of job ids, FIFO within a priority.
#[derive(Default)]
pub struct JobQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, job_id: JobId, priority: Priority) -> QueueResult<()> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            debug!(job_id = %job_id, ?priority, seq, "Enqueued job");
            state.heap.push(QueuedJob { priority, seq, job_id });
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next job. Returns `None` once the queue is closed.
    pub async fn pop(&self) -> Option<JobId> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }
                if let Some(next) = state.heap.pop() {
                    return Some(next.job_id);
                }
            }

            notified.await;
        }
    }

    /// Drop a queued job. Returns whether it was waiting.
    pub async fn remove(&self, job_id: &JobId) -> bool {
        let mut state = self.state.lock().await;
        let before = state.heap.len();
        state.heap.retain(|q| &q.job_id != job_id);
        state.heap.len() != before
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.heap.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop handing out jobs and wake every waiting consumer.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}
