use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use time::OffsetDateTime;
use tokio::sync::{Notify, broadcast};
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::application::repos::{JobStore, NewJobRecord, RepoError};
use crate::domain::entities::{JobCounts, JobRecord};
use crate::domain::jobs::{EnqueueOptions, HtmlSource, JobError, JobPayload};
use crate::domain::types::{JobId, JobState, RenderTarget};

use super::events::{JobEvent, JobEvents};
use super::policy::QueuePolicy;

const COMPLETION_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The screenshot job queue.
///
/// An explicitly constructed service owning its backing store, retry policy,
/// and lifecycle event channel. Callers enqueue; the worker pool claims and
/// reports; the janitor recovers stalls and sweeps retention.
pub struct ScreenshotQueue {
    store: Arc<dyn JobStore>,
    events: JobEvents,
    policy: QueuePolicy,
    ready: Notify,
}

impl ScreenshotQueue {
    pub fn new(store: Arc<dyn JobStore>, policy: QueuePolicy) -> Self {
        Self {
            store,
            events: JobEvents::new(),
            policy,
            ready: Notify::new(),
        }
    }

    pub fn policy(&self) -> &QueuePolicy {
        &self.policy
    }

    /// Durably record a new job and wake idle workers. Returns as soon as
    /// the row is written; rendering happens later on a worker.
    pub async fn enqueue(
        &self,
        source: HtmlSource,
        target: Option<RenderTarget>,
        options: EnqueueOptions,
    ) -> Result<JobId, RepoError> {
        let payload = JobPayload { source, target };
        let payload = serde_json::to_value(&payload).map_err(RepoError::from_persistence)?;

        let max_attempts = options
            .max_attempts
            .unwrap_or(self.policy.default_max_attempts);
        if max_attempts < 1 {
            return Err(RepoError::invalid_input("max_attempts must be at least 1"));
        }

        let run_at = match options.delay {
            Some(delay) => OffsetDateTime::now_utc() + delay,
            None => OffsetDateTime::now_utc(),
        };

        let id = self
            .store
            .insert_job(NewJobRecord {
                payload,
                priority: options.priority,
                max_attempts,
                run_at,
            })
            .await?;

        counter!("scatto_jobs_enqueued_total").increment(1);
        info!(
            target = "application::queue::service",
            job_id = %id,
            priority = options.priority,
            max_attempts,
            delayed = options.delay.is_some(),
            "Screenshot job enqueued"
        );

        self.ready.notify_waiters();
        Ok(id)
    }

    /// Claim the next ready job for `worker`, or `None` when the queue has
    /// nothing eligible.
    pub async fn claim_next(&self, worker: &str) -> Result<Option<JobRecord>, RepoError> {
        self.store.claim_next(worker).await
    }

    /// Park until new work may be available: either an enqueue notification
    /// arrives or the poll interval elapses (the backstop for delayed jobs
    /// becoming ready and for multi-process deployments).
    pub async fn wait_for_work(&self, poll_interval: Duration) {
        tokio::select! {
            _ = self.ready.notified() => {}
            _ = sleep(poll_interval) => {}
        }
    }

    /// Terminal success for a claimed job.
    pub async fn report_success(
        &self,
        job: &JobRecord,
        image_url: &str,
    ) -> Result<(), RepoError> {
        self.store.mark_completed(job.id, image_url).await?;

        counter!("scatto_jobs_completed_total").increment(1);
        if let Some(lock_at) = job.lock_at {
            let elapsed = OffsetDateTime::now_utc() - lock_at;
            histogram!("scatto_job_ms").record(elapsed.whole_milliseconds() as f64);
        }

        info!(
            target = "application::queue::service",
            job_id = %job.id,
            attempts = job.attempts,
            image_url,
            "Screenshot job completed"
        );

        self.events.publish(JobEvent::Completed {
            id: job.id,
            image_url: image_url.to_string(),
        });
        Ok(())
    }

    /// Report a failed attempt for a claimed job.
    ///
    /// Retryable failures with attempts remaining go back to the delayed
    /// pool with exponential backoff (`base * 2^attempts_made`), keeping
    /// their original priority. Everything else goes terminal `failed`,
    /// surfaced through the event channel rather than silently dropped.
    pub async fn report_failure(
        &self,
        job: &JobRecord,
        error: &JobError,
    ) -> Result<(), RepoError> {
        if error.is_retryable() && job.attempts < job.max_attempts {
            let delay = self.policy.backoff_delay(job.attempts);
            let run_at = OffsetDateTime::now_utc() + delay;
            self.store.reschedule(job.id, error.message(), run_at).await?;

            counter!("scatto_jobs_retried_total").increment(1);
            warn!(
                target = "application::queue::service",
                job_id = %job.id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Screenshot job attempt failed; scheduled for retry"
            );
            return Ok(());
        }

        self.store.mark_failed(job.id, error.message()).await?;

        counter!("scatto_jobs_failed_total").increment(1);
        warn!(
            target = "application::queue::service",
            job_id = %job.id,
            attempts = job.attempts,
            retryable = error.is_retryable(),
            error = %error,
            "Screenshot job failed terminally"
        );

        self.events.publish(JobEvent::Failed {
            id: job.id,
            error: error.message().to_string(),
        });
        Ok(())
    }

    /// Record observability progress; doubles as the worker's liveness
    /// heartbeat.
    pub async fn record_progress(&self, id: JobId, progress: i16) -> Result<(), RepoError> {
        self.store
            .record_progress(id, progress.clamp(0, 100))
            .await
    }

    /// Best-effort point-in-time counts for dashboards.
    pub async fn stats(&self) -> Result<JobCounts, RepoError> {
        let counts = self.store.counts().await?;
        let depth = counts.waiting + counts.delayed + counts.active;
        gauge!("scatto_queue_depth").set(depth as f64);
        Ok(counts)
    }

    /// Requeue active jobs whose worker stopped heartbeating within the
    /// liveness window. Returns the number of jobs released.
    pub async fn recover_stalled(&self) -> Result<usize, RepoError> {
        let cutoff = OffsetDateTime::now_utc() - self.policy.stall_timeout;
        let released = self.store.release_stalled(cutoff).await?;

        for stalled in &released {
            counter!("scatto_jobs_stalled_total").increment(1);
            warn!(
                target = "application::queue::service",
                job_id = %stalled.id,
                exhausted = stalled.exhausted,
                "Active job lost worker liveness; recovered"
            );
            self.events.publish(JobEvent::Stalled { id: stalled.id });
            if stalled.exhausted {
                self.events.publish(JobEvent::Failed {
                    id: stalled.id,
                    error: "worker lost liveness with no attempts remaining".to_string(),
                });
            }
        }

        if !released.is_empty() {
            self.ready.notify_waiters();
        }
        Ok(released.len())
    }

    /// Evict terminal jobs past their retention windows.
    pub async fn sweep(&self) -> Result<u64, RepoError> {
        let now = OffsetDateTime::now_utc();
        let removed = self
            .store
            .sweep(
                now - self.policy.completed_retention,
                now - self.policy.failed_retention,
            )
            .await?;

        if removed > 0 {
            counter!("scatto_jobs_swept_total").increment(removed);
            info!(
                target = "application::queue::service",
                removed, "Swept terminal jobs past retention"
            );
        }
        Ok(removed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub async fn find_job(&self, id: JobId) -> Result<Option<JobRecord>, RepoError> {
        self.store.find_job(id).await
    }

    /// Block until the job reaches a terminal state or the timeout elapses,
    /// returning the final job snapshot. Serves fire-and-observe callers.
    pub async fn wait_for_completion(
        &self,
        id: JobId,
        timeout: Duration,
    ) -> Result<JobRecord, RepoError> {
        let deadline = Instant::now() + timeout;

        loop {
            let job = self
                .store
                .find_job(id)
                .await?
                .ok_or(RepoError::NotFound)?;

            match job.state {
                JobState::Completed => return Ok(job),
                JobState::Failed => {
                    let message = job
                        .last_error
                        .unwrap_or_else(|| "job failed without error text".to_string());
                    return Err(RepoError::Persistence(message));
                }
                _ => {
                    if Instant::now() >= deadline {
                        return Err(RepoError::Timeout);
                    }
                    sleep(COMPLETION_POLL_INTERVAL).await;
                }
            }
        }
    }
}
