//! Job bookkeeping for the generation service.
//!
//! This crate provides:
//! - Job persistence behind the [`JobStore`] trait (in-memory or Redis)
//! - An in-process priority queue feeding the worker pool
//! - Job events fanned out to subscribers, optionally mirrored to Redis Pub/Sub

pub mod error;
pub mod progress;
pub mod queue;
pub mod store;

pub use error::{QueueError, QueueResult};
pub use progress::{JobEventStream, ProgressChannel};
pub use queue::{JobQueue, QueueConfig, StoreBackend};
pub use store::{JobFilter, JobPage, JobStore, MemoryJobStore, RedisJobStore, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
