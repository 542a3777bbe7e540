//! Job manager: admission, the worker pool, retries, cancellation and retention.
//!
//! The manager is the only writer of job records. Store writes go through one
//! lock so a worker finishing a job and a caller cancelling it cannot
//! interleave. Workers pull job ids from the priority queue; each attempt gets
//! its own cancel flag, handed to the pipeline and every subprocess it starts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use validator::Validate;

use reel_models::{GenerationRequest, Job, JobEvent, JobId, JobResult, JobStatus};
use reel_queue::{
    JobEventStream, JobFilter, JobPage, JobQueue, JobStore, ProgressChannel, QueueError, MAX_PAGE_SIZE,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::pipeline::{job_output_dir, Generator, ProgressCallback};
use crate::retry::RetryPolicy;

/// Message recorded on attempts cut short by a restart.
const INTERRUPTED: &str = "attempt interrupted by service restart";

/// What startup recovery did with the jobs it found.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecoveryReport {
    /// Pending jobs put back on the queue
    pub requeued: usize,
    /// Running jobs moved back to pending for another attempt
    pub interrupted: usize,
    /// Running jobs with no attempts left
    pub failed: usize,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.requeued + self.interrupted + self.failed == 0
    }
}

/// Pool and lifecycle settings taken from [`WorkerConfig`].
#[derive(Debug, Clone)]
struct ManagerSettings {
    pool_size: usize,
    retry: RetryPolicy,
    retention: Duration,
    sweep_interval: Duration,
}

struct Inner {
    settings: ManagerSettings,
    generator: Arc<Generator>,
    store: Arc<dyn JobStore>,
    queue: JobQueue,
    events: ProgressChannel,
    writes: Mutex<()>,
    running: StdMutex<HashMap<JobId, watch::Sender<bool>>>,
    shutdown: watch::Sender<bool>,
}

/// Accepts generation requests and drives them to a terminal state.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(
        config: &WorkerConfig,
        generator: Arc<Generator>,
        store: Arc<dyn JobStore>,
        events: ProgressChannel,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                settings: ManagerSettings {
                    pool_size: config.pool_size.max(1),
                    retry: config.retry,
                    retention: config.retention,
                    sweep_interval: config.sweep_interval,
                },
                generator,
                store,
                queue: JobQueue::new(),
                events,
                writes: Mutex::new(()),
                running: StdMutex::new(HashMap::new()),
                shutdown,
            }),
        }
    }

    /// Re-queue unfinished jobs from the store, then spawn the worker pool
    /// and the retention sweeper.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let pool_size = self.inner.settings.pool_size;
        info!(pool_size, store = self.inner.store.backend(), "Starting job manager");

        match self.inner.recover().await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => info!(
                requeued = report.requeued,
                interrupted = report.interrupted,
                failed = report.failed,
                "Recovered unfinished jobs"
            ),
            Err(e) => error!("Job recovery failed: {}", e),
        }

        let mut handles: Vec<JoinHandle<()>> = (0..pool_size)
            .map(|worker| {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move { inner.worker_loop(worker).await })
            })
            .collect();

        let inner = Arc::clone(&self.inner);
        handles.push(tokio::spawn(async move { inner.sweep_loop().await }));
        handles
    }

    /// Stop handing out jobs. Running attempts finish; queued jobs stay pending.
    pub async fn shutdown(&self) {
        info!("Shutting down job manager");
        let _ = self.inner.shutdown.send(true);
        self.inner.queue.close().await;
    }

    /// Validate and enqueue a request.
    ///
    /// Rejected requests are never stored or queued.
    pub async fn submit(&self, request: GenerationRequest) -> WorkerResult<Job> {
        request
            .validate()
            .map_err(|e| WorkerError::validation(GenerationRequest::validation_message(&e)))?;
        self.inner.generator.segmenter().segment_request(&request)?;

        let job = Job::new(request).with_max_attempts(self.inner.settings.retry.max_attempts);
        self.inner.store.insert(&job).await?;
        self.inner.queue.push(job.id.clone(), job.request.priority).await?;

        metrics::counter!("reel_jobs_submitted_total").increment(1);
        info!(
            job_id = %job.id,
            requester = %job.requester(),
            platform = %job.request.platform.as_str(),
            "Job submitted"
        );
        self.inner
            .events
            .publish(JobEvent::status(job.id.clone(), JobStatus::Pending, 0));
        Ok(job)
    }

    pub async fn status(&self, job_id: &JobId) -> WorkerResult<Job> {
        self.inner.load(job_id).await
    }

    /// Cancel a job that has not reached a terminal state.
    ///
    /// Queued jobs are dropped from the queue; a running attempt sees the flag
    /// at its next stage boundary and its FFmpeg process is killed.
    pub async fn cancel(&self, job_id: &JobId) -> WorkerResult<Job> {
        let job = {
            let _guard = self.inner.writes.lock().await;
            let mut job = self.inner.load(job_id).await?;
            job.cancel().map_err(QueueError::from)?;
            self.inner.store.put(&job).await?;
            job
        };

        let was_queued = self.inner.queue.remove(job_id).await;
        if let Some(flag) = self.inner.running_flags().get(job_id) {
            let _ = flag.send(true);
        }

        info!(job_id = %job_id, was_queued, "Job cancelled");
        metrics::counter!("reel_jobs_completed_total", "status" => JobStatus::Cancelled.as_str()).increment(1);
        self.inner
            .events
            .publish(JobEvent::status(job_id.clone(), JobStatus::Cancelled, job.retry_count));
        Ok(job)
    }

    pub async fn list(&self, filter: &JobFilter) -> WorkerResult<JobPage> {
        Ok(self.inner.store.list(filter).await?)
    }

    /// Live events for one job.
    pub fn subscribe(&self, job_id: &JobId) -> JobEventStream {
        self.inner.events.subscribe(job_id)
    }

    /// Evict expired terminal jobs and their artifacts. Returns how many went.
    pub async fn sweep_expired(&self) -> WorkerResult<usize> {
        self.inner.sweep().await
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    pub fn generator(&self) -> &Arc<Generator> {
        &self.inner.generator
    }

    pub async fn queued(&self) -> usize {
        self.inner.queue.len().await
    }
}

impl Inner {
    async fn load(&self, job_id: &JobId) -> WorkerResult<Job> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::not_found(job_id).into())
    }

    /// Every stored job in `status`, oldest first.
    async fn jobs_in(&self, status: JobStatus) -> WorkerResult<Vec<Job>> {
        let mut filter = JobFilter {
            status: Some(status),
            page_size: MAX_PAGE_SIZE,
            ..JobFilter::default()
        };
        let mut jobs = Vec::new();
        loop {
            let page = self.store.list(&filter).await?;
            let fetched = page.jobs.len();
            jobs.extend(page.jobs);
            if fetched == 0 || jobs.len() >= page.total {
                break;
            }
            filter.page += 1;
        }
        jobs.reverse();
        Ok(jobs)
    }

    /// Bring jobs left unfinished by a previous process back under management.
    ///
    /// Pending jobs are queued again. Started or processing jobs lost their
    /// worker: they count as a failed attempt and are retried while the
    /// attempt budget allows, otherwise they fail.
    async fn recover(&self) -> WorkerResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut ready = self.jobs_in(JobStatus::Pending).await?;

        for status in [JobStatus::Started, JobStatus::Processing] {
            for job in self.jobs_in(status).await? {
                let _guard = self.writes.lock().await;
                // re-read under the lock; the listing may be stale
                let Some(mut job) = self.store.get(&job.id).await? else {
                    continue;
                };
                if job.status != status {
                    continue;
                }

                if job.can_retry() {
                    job.requeue_for_retry(INTERRUPTED).map_err(QueueError::from)?;
                    self.store.put(&job).await?;
                    warn!(job_id = %job.id, attempt = job.retry_count, "Requeued interrupted job");
                    self.events
                        .publish(JobEvent::status(job.id.clone(), JobStatus::Pending, job.retry_count));
                    report.interrupted += 1;
                    ready.push(job);
                } else {
                    job.fail(INTERRUPTED).map_err(QueueError::from)?;
                    self.store.put(&job).await?;
                    warn!(job_id = %job.id, "Interrupted job has no attempts left");
                    metrics::counter!("reel_jobs_completed_total", "status" => JobStatus::Failure.as_str()).increment(1);
                    self.events.publish(JobEvent::error(job.id.clone(), INTERRUPTED, false));
                    self.events
                        .publish(JobEvent::status(job.id.clone(), JobStatus::Failure, job.retry_count));
                    report.failed += 1;
                }
            }
        }

        for job in &ready {
            self.queue.push(job.id.clone(), job.request.priority).await?;
        }
        report.requeued = ready.len() - report.interrupted;
        Ok(report)
    }

    fn running_flags(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, watch::Sender<bool>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        debug!(worker, "Worker ready");
        while let Some(job_id) = self.queue.pop().await {
            Arc::clone(&self).run_attempt(job_id).await;
        }
        debug!(worker, "Worker stopped");
    }

    /// Claim a pending job for this attempt, or skip it.
    async fn claim(&self, job_id: &JobId) -> Option<(Job, watch::Receiver<bool>)> {
        let _guard = self.writes.lock().await;
        let mut job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(job_id = %job_id, "Dequeued job no longer exists");
                return None;
            }
            Err(e) => {
                error!(job_id = %job_id, "Failed to load dequeued job: {}", e);
                return None;
            }
        };

        // cancelled while waiting or backing off
        if job.status != JobStatus::Pending {
            debug!(job_id = %job_id, status = %job.status, "Skipping dequeued job");
            return None;
        }

        if let Err(e) = job.start() {
            warn!(job_id = %job_id, "Cannot start job: {}", e);
            return None;
        }
        if let Err(e) = self.store.put(&job).await {
            error!(job_id = %job_id, "Failed to persist job start: {}", e);
            return None;
        }

        let (tx, rx) = watch::channel(false);
        self.running_flags().insert(job_id.clone(), tx);
        Some((job, rx))
    }

    async fn run_attempt(self: Arc<Self>, job_id: JobId) {
        let Some((job, cancel)) = self.claim(&job_id).await else {
            return;
        };
        self.events
            .publish(JobEvent::status(job_id.clone(), JobStatus::Started, job.retry_count));

        let logger = JobLogger::new(&job_id, job.retry_count + 1);
        let span = logger.create_span();
        async {
            logger.log_start(&format!("{} chars for {}", job.request.script.len(), job.requester()));

            let (progress_tx, progress_rx) = mpsc::unbounded_channel();
            let writer = tokio::spawn(Arc::clone(&self).progress_writer(job_id.clone(), progress_rx, logger.clone()));

            let events = self.events.clone();
            let event_job = job_id.clone();
            let callback: ProgressCallback = Arc::new(move |fraction, message: String| {
                events.publish(JobEvent::progress(event_job.clone(), fraction, message.clone()));
                let _ = progress_tx.send((fraction, message));
            });

            let outcome = self.generator.generate(&job_id, &job.request, callback, cancel).await;

            // the callback is gone with the pipeline; drain its last updates
            if let Err(e) = writer.await {
                warn!("Progress writer stopped abnormally: {}", e);
            }
            self.running_flags().remove(&job_id);

            if let Err(e) = self.finish(&job_id, outcome, &logger).await {
                error!("Failed to record job outcome: {}", e);
            }
        }
        .instrument(span)
        .await;
    }

    async fn progress_writer(
        self: Arc<Self>,
        job_id: JobId,
        mut updates: mpsc::UnboundedReceiver<(f64, String)>,
        logger: JobLogger,
    ) {
        while let Some((fraction, message)) = updates.recv().await {
            let _guard = self.writes.lock().await;
            let mut job = match self.store.get(&job_id).await {
                Ok(Some(job)) => job,
                Ok(None) => return,
                Err(e) => {
                    warn!(job_id = %job_id, "Failed to load job for progress: {}", e);
                    continue;
                }
            };
            let first = job.status == JobStatus::Started;
            if !job.record_progress(fraction, &message) {
                continue;
            }
            if let Err(e) = self.store.put(&job).await {
                warn!(job_id = %job_id, "Failed to persist progress: {}", e);
                continue;
            }
            if first {
                self.events
                    .publish(JobEvent::status(job_id.clone(), JobStatus::Processing, job.retry_count));
            }
            logger.log_progress(fraction, &message);
        }
    }

    async fn finish(
        self: &Arc<Self>,
        job_id: &JobId,
        outcome: WorkerResult<JobResult>,
        logger: &JobLogger,
    ) -> WorkerResult<()> {
        let _guard = self.writes.lock().await;
        let mut job = self.load(job_id).await?;

        if job.status == JobStatus::Cancelled {
            logger.log_cancelled();
            if outcome.is_ok() {
                // finished just as it was cancelled; nothing may be published
                self.discard_output(job_id).await;
            }
            return Ok(());
        }

        match outcome {
            Ok(result) => {
                let duration_secs = result.metadata.duration_secs;
                job.complete(result).map_err(QueueError::from)?;
                self.store.put(&job).await?;
                logger.log_completion(&format!("{:.1}s video", duration_secs));
                metrics::counter!("reel_jobs_completed_total", "status" => JobStatus::Success.as_str()).increment(1);
                self.events.publish(JobEvent::done(job_id.clone(), duration_secs));
            }
            Err(e) if e.is_cancelled() => {
                job.cancel().map_err(QueueError::from)?;
                self.store.put(&job).await?;
                logger.log_cancelled();
                metrics::counter!("reel_jobs_completed_total", "status" => JobStatus::Cancelled.as_str()).increment(1);
                self.events
                    .publish(JobEvent::status(job_id.clone(), JobStatus::Cancelled, job.retry_count));
            }
            Err(e) if e.is_retryable() && job.can_retry() => {
                let delay = self.settings.retry.delay_for_retry(job.retry_count + 1);
                let message = e.to_string();
                job.requeue_for_retry(&message).map_err(QueueError::from)?;
                self.store.put(&job).await?;
                logger.log_retry(delay.as_millis(), &message);
                metrics::counter!("reel_jobs_retried_total").increment(1);
                self.events.publish(JobEvent::error(job_id.clone(), &message, true));
                self.events
                    .publish(JobEvent::status(job_id.clone(), JobStatus::Pending, job.retry_count));
                self.schedule_retry(job, delay);
            }
            Err(e) => {
                let message = e.to_string();
                job.fail(&message).map_err(QueueError::from)?;
                self.store.put(&job).await?;
                logger.log_error(&message);
                metrics::counter!("reel_jobs_completed_total", "status" => JobStatus::Failure.as_str()).increment(1);
                self.events.publish(JobEvent::error(job_id.clone(), &message, false));
                self.events
                    .publish(JobEvent::status(job_id.clone(), JobStatus::Failure, job.retry_count));
            }
        }
        Ok(())
    }

    /// Queue the next attempt after `delay`.
    ///
    /// If the manager shuts down first the job stays pending in the store and
    /// is picked up by the next start.
    fn schedule_retry(self: &Arc<Self>, job: Job, delay: Duration) {
        let inner = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stopped| *stopped) => {
                    info!(job_id = %job.id, "Shutting down; retry left pending");
                    return;
                }
            }
            if let Err(e) = inner.queue.push(job.id.clone(), job.request.priority).await {
                info!(job_id = %job.id, "Retry left pending: {}", e);
            }
        });
    }

    async fn discard_output(&self, job_id: &JobId) {
        let dir = job_output_dir(&self.generator.config().output_dir, job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(path = %dir.display(), "Removed job output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %dir.display(), "Failed to remove job output: {}", e),
        }
    }

    async fn sweep(&self) -> WorkerResult<usize> {
        let evicted = self.store.evict_expired(self.settings.retention).await?;
        for job in &evicted {
            self.discard_output(&job.id).await;
        }
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted expired jobs");
        }
        Ok(evicted.len())
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut interval = tokio::time::interval(self.settings.sweep_interval.max(Duration::from_secs(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!("Retention sweep failed: {}", e);
                    }
                }
            }
        }
        debug!("Retention sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{fixture, FakeRenderer, Fixture};
    use futures::StreamExt;
    use reel_models::JobEventKind;
    use reel_queue::MemoryJobStore;
    use tokio_test::{assert_err, assert_ok};

    const SCRIPT: &str = "Hello. This is a test. Goodbye.";

    fn manager(fx: &Fixture, tweak: impl FnOnce(&mut WorkerConfig)) -> JobManager {
        manager_over(fx, Arc::new(MemoryJobStore::new()), tweak)
    }

    fn manager_over(fx: &Fixture, store: Arc<dyn JobStore>, tweak: impl FnOnce(&mut WorkerConfig)) -> JobManager {
        let mut config = WorkerConfig {
            pool_size: 2,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            },
            ..WorkerConfig::default()
        };
        tweak(&mut config);
        JobManager::new(
            &config,
            fx.generator.clone(),
            store,
            ProgressChannel::new(64),
        )
    }

    async fn wait_for(manager: &JobManager, id: &JobId, status: JobStatus) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = manager.status(id).await.unwrap();
            if job.status == status {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job stuck in {} waiting for {}",
                job.status,
                status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn history(job: &Job) -> Vec<JobStatus> {
        job.transitions.iter().map(|t| t.to).collect()
    }

    #[tokio::test]
    async fn test_job_runs_to_success() {
        let fx = fixture(FakeRenderer::default());
        let manager = manager(&fx, |_| {});
        manager.start().await;

        let job = manager.submit(GenerationRequest::new("alice", SCRIPT)).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        let done = wait_for(&manager, &job.id, JobStatus::Success).await;
        assert_eq!(done.progress, 1.0);
        assert_eq!(done.retry_count, 0);
        assert_eq!(
            history(&done),
            vec![JobStatus::Started, JobStatus::Processing, JobStatus::Success]
        );
        let result = done.result.unwrap();
        assert!(result.video_path.exists());
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_blank_script_rejected_without_enqueue() {
        let fx = fixture(FakeRenderer::default());
        let manager = manager(&fx, |_| {});

        let err = manager.submit(GenerationRequest::new("alice", "   ")).await.unwrap_err();
        assert!(matches!(err, WorkerError::Validation(_)));
        assert_eq!(manager.queued().await, 0);
        assert_eq!(manager.list(&JobFilter::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_script_over_budget_rejected() {
        let fx = fixture(FakeRenderer::default());
        let manager = manager(&fx, |_| {});
        let mut request = GenerationRequest::new("alice", "word ".repeat(200));
        request.target_duration_secs = Some(10);

        let err = manager.submit(request).await.unwrap_err();
        assert!(matches!(err, WorkerError::Segmentation(_)));
        assert_eq!(manager.queued().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_running_job_frees_worker() {
        let renderer = FakeRenderer::default();
        renderer.hang_compose();
        let fx = fixture(renderer);
        let manager = manager(&fx, |c| c.pool_size = 1);
        manager.start().await;

        let first = manager.submit(GenerationRequest::new("alice", SCRIPT)).await.unwrap();
        fx.renderer.compose_started.notified().await;

        let cancelled = manager.cancel(&first.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        fx.renderer.release_compose();

        let second = manager.submit(GenerationRequest::new("bob", SCRIPT)).await.unwrap();
        wait_for(&manager, &second.id, JobStatus::Success).await;

        let first = manager.status(&first.id).await.unwrap();
        assert_eq!(first.status, JobStatus::Cancelled);
        assert!(first.result.is_none());
        assert!(!fx.output_dir().join(first.id.as_str()).exists());
        assert_eq!(std::fs::read_dir(fx.work_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let fx = fixture(FakeRenderer::default());
        let manager = manager(&fx, |_| {});

        let job = manager.submit(GenerationRequest::new("alice", SCRIPT)).await.unwrap();
        assert_eq!(manager.queued().await, 1);

        let cancelled = assert_ok!(manager.cancel(&job.id).await);
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(manager.queued().await, 0);

        let again = assert_err!(manager.cancel(&job.id).await);
        assert!(matches!(again, WorkerError::Queue(QueueError::InvalidTransition(_))));
    }

    #[tokio::test]
    async fn test_unknown_job_not_found() {
        let fx = fixture(FakeRenderer::default());
        let manager = manager(&fx, |_| {});
        let err = manager.status(&JobId::from_string("missing")).await.unwrap_err();
        assert!(matches!(err, WorkerError::Queue(QueueError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let renderer = FakeRenderer::default();
        renderer.fail_compose(1);
        let fx = fixture(renderer);
        let manager = manager(&fx, |_| {});
        manager.start().await;

        let job = manager.submit(GenerationRequest::new("alice", SCRIPT)).await.unwrap();
        let done = wait_for(&manager, &job.id, JobStatus::Success).await;

        assert_eq!(done.retry_count, 1);
        let history = history(&done);
        assert_eq!(history.iter().filter(|s| **s == JobStatus::Started).count(), 2);
        assert!(history.contains(&JobStatus::Pending));
        assert_eq!(history.last(), Some(&JobStatus::Success));
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let renderer = FakeRenderer::default();
        renderer.fail_compose(100);
        let fx = fixture(renderer);
        let manager = manager(&fx, |c| c.retry.max_attempts = 2);
        manager.start().await;

        let job = manager.submit(GenerationRequest::new("alice", SCRIPT)).await.unwrap();
        let failed = wait_for(&manager, &job.id, JobStatus::Failure).await;

        assert_eq!(failed.retry_count, 1);
        let error = failed.error.unwrap();
        assert!(error.contains("scene 0"), "unexpected error: {}", error);
        assert!(failed.result.is_none());
        assert_eq!(fx.renderer.composed.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_events_end_with_final_event() {
        let fx = fixture(FakeRenderer::default());
        let manager = manager(&fx, |_| {});

        let job = manager.submit(GenerationRequest::new("alice", SCRIPT)).await.unwrap();
        let mut events = manager.subscribe(&job.id);
        manager.start().await;

        let mut fractions = Vec::new();
        let last = loop {
            let event = tokio::time::timeout(Duration::from_secs(5), events.next())
                .await
                .unwrap()
                .unwrap();
            if let JobEventKind::Progress { fraction, .. } = event.kind {
                fractions.push(fraction);
            }
            if event.is_final() {
                break event;
            }
        };

        assert!(matches!(last.kind, JobEventKind::Done { .. }));
        assert!(!fractions.is_empty());
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_list_by_requester() {
        let fx = fixture(FakeRenderer::default());
        let manager = manager(&fx, |_| {});
        for requester in ["alice", "alice", "bob"] {
            manager.submit(GenerationRequest::new(requester, SCRIPT)).await.unwrap();
        }

        let page = manager.list(&JobFilter::for_requester("alice")).await.unwrap();
        assert_eq!(page.total, 2);
        assert!(page.jobs.iter().all(|j| j.requester() == "alice"));
    }

    /// A job as a crashed process would have left it.
    fn stored_job(max_attempts: u32, status: JobStatus) -> Job {
        let mut job = Job::new(GenerationRequest::new("alice", SCRIPT)).with_max_attempts(max_attempts);
        if status != JobStatus::Pending {
            job.start().unwrap();
        }
        if status == JobStatus::Processing {
            assert!(job.record_progress(0.3, "Composing scene 1/3"));
        }
        job
    }

    async fn crashed_store() -> (Arc<dyn JobStore>, [Job; 3]) {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let jobs = [
            stored_job(3, JobStatus::Pending),
            stored_job(3, JobStatus::Processing),
            stored_job(1, JobStatus::Started),
        ];
        for job in &jobs {
            store.insert(job).await.unwrap();
        }
        (store, jobs)
    }

    #[tokio::test]
    async fn test_recovery_sorts_unfinished_jobs() {
        let fx = fixture(FakeRenderer::default());
        let (store, [_, running, exhausted]) = crashed_store().await;
        let manager = manager_over(&fx, store, |_| {});

        let report = manager.inner.recover().await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                requeued: 1,
                interrupted: 1,
                failed: 1,
            }
        );
        assert_eq!(manager.queued().await, 2);

        let requeued = manager.status(&running.id).await.unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert_eq!(requeued.retry_count, 1);
        let failed = manager.status(&exhausted.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failure);
        assert_eq!(failed.error.as_deref(), Some(INTERRUPTED));
    }

    #[tokio::test]
    async fn test_start_resumes_unfinished_jobs() {
        let fx = fixture(FakeRenderer::default());
        let (store, [waiting, running, exhausted]) = crashed_store().await;
        let manager = manager_over(&fx, store, |_| {});
        manager.start().await;

        let done = wait_for(&manager, &waiting.id, JobStatus::Success).await;
        assert_eq!(done.retry_count, 0);
        let retried = wait_for(&manager, &running.id, JobStatus::Success).await;
        assert_eq!(retried.retry_count, 1);
        assert!(history(&retried).contains(&JobStatus::Pending));
        assert_eq!(manager.status(&exhausted.id).await.unwrap().status, JobStatus::Failure);
    }

    #[tokio::test]
    async fn test_retry_pending_at_shutdown_resumes_on_next_start() {
        let renderer = FakeRenderer::default();
        renderer.fail_compose(1);
        let fx = fixture(renderer);
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let first = manager_over(&fx, store.clone(), |c| {
            c.retry.base_delay = Duration::from_millis(300);
            c.retry.max_delay = Duration::from_millis(300);
        });
        first.start().await;

        let job = first.submit(GenerationRequest::new("alice", SCRIPT)).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while first.status(&job.id).await.unwrap().retry_count == 0 {
            assert!(tokio::time::Instant::now() < deadline, "first attempt never failed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        first.shutdown().await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(first.status(&job.id).await.unwrap().status, JobStatus::Pending);

        let second = manager_over(&fx, store, |_| {});
        second.start().await;
        let done = wait_for(&second, &job.id, JobStatus::Success).await;
        assert_eq!(done.retry_count, 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_jobs_and_output() {
        let fx = fixture(FakeRenderer::default());
        let manager = manager(&fx, |c| c.retention = Duration::ZERO);
        manager.start().await;

        let job = manager.submit(GenerationRequest::new("alice", SCRIPT)).await.unwrap();
        wait_for(&manager, &job.id, JobStatus::Success).await;
        let output = fx.output_dir().join(job.id.as_str());
        assert!(output.exists());

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(manager.sweep_expired().await.unwrap(), 1);
        assert!(!output.exists());
        assert!(manager.status(&job.id).await.is_err());
    }
}
