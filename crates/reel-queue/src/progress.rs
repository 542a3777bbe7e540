//! Job event fan-out.

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::pin::Pin;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use reel_models::{JobEvent, JobId};

use crate::error::QueueResult;

pub type JobEventStream = Pin<Box<dyn Stream<Item = JobEvent> + Send>>;

/// Broadcasts job events to in-process subscribers.
///
/// Publishing never blocks: slow subscribers lag and skip events. The
/// optional Redis mirror is fed through a bounded queue drained by a single
/// task, so mirrored events keep publish order.
#[derive(Clone)]
pub struct ProgressChannel {
    tx: broadcast::Sender<JobEvent>,
    mirror: Option<Mirror>,
}

#[derive(Clone)]
struct Mirror {
    tx: mpsc::Sender<(String, String)>,
    prefix: String,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, mirror: None }
    }

    /// Also publish every event to `{prefix}:progress:{job_id}`.
    ///
    /// Must be called inside a Tokio runtime; the mirror task lives until
    /// every clone of the channel is dropped.
    pub fn with_redis(self, redis_url: &str, prefix: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(self.with_publisher(RedisPublisher::new(client), prefix))
    }

    fn with_publisher(mut self, publisher: impl Publisher + 'static, prefix: &str) -> Self {
        let (tx, rx) = mpsc::channel(MIRROR_CAPACITY);
        tokio::spawn(drain_mirror(rx, publisher));
        self.mirror = Some(Mirror {
            tx,
            prefix: prefix.to_string(),
        });
        self
    }

    /// Get the Redis channel name for a job.
    pub fn channel_name(prefix: &str, job_id: &JobId) -> String {
        format!("{}:progress:{}", prefix, job_id)
    }

    pub fn publish(&self, event: JobEvent) {
        if let Some(mirror) = &self.mirror {
            match serde_json::to_string(&event) {
                Ok(payload) => {
                    let channel = Self::channel_name(&mirror.prefix, &event.job_id);
                    if let Err(e) = mirror.tx.try_send((channel, payload)) {
                        warn!(job_id = %event.job_id, "Dropping mirrored job event: {}", e);
                    }
                }
                Err(e) => warn!("Failed to serialize job event: {}", e),
            }
        }

        // no receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Events for one job, in publish order.
    ///
    /// The stream ends when the channel is dropped; callers stop on a final event.
    pub fn subscribe(&self, job_id: &JobId) -> JobEventStream {
        let job_id = job_id.clone();
        let rx = self.tx.subscribe();

        let events = futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Event subscriber lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Box::pin(events.filter(move |event| futures_util::future::ready(event.job_id == job_id)))
    }
}

const MIRROR_CAPACITY: usize = 1024;

/// Destination for mirrored events.
#[async_trait]
trait Publisher: Send {
    async fn publish(&mut self, channel: &str, payload: &str) -> redis::RedisResult<()>;
}

/// Publishes over one multiplexed connection, reconnecting after a failure.
struct RedisPublisher {
    client: redis::Client,
    conn: Option<MultiplexedConnection>,
}

impl RedisPublisher {
    fn new(client: redis::Client) -> Self {
        Self { client, conn: None }
    }
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&mut self, channel: &str, payload: &str) -> redis::RedisResult<()> {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.client.get_multiplexed_async_connection().await?,
        };
        let result = conn.publish::<_, _, ()>(channel, payload).await;
        if result.is_ok() {
            self.conn = Some(conn);
        }
        result
    }
}

async fn drain_mirror(mut rx: mpsc::Receiver<(String, String)>, mut publisher: impl Publisher) {
    while let Some((channel, payload)) = rx.recv().await {
        if let Err(e) = publisher.publish(&channel, &payload).await {
            warn!(channel = %channel, "Failed to publish job event: {}", e);
        }
    }
    info!("Job event mirror stopped");
}
