//! The worker pool: claims jobs, renders, stores, persists, reports.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::application::persist::ResultPersister;
use crate::application::queue::ScreenshotQueue;
use crate::application::render::RenderOrchestrator;
use crate::domain::entities::JobRecord;
use crate::domain::jobs::{HtmlSource, JobError, JobPayload};
use crate::infra::storage::PreviewStorage;

/// Progress checkpoints reported during processing. Observability only; the
/// writes double as liveness heartbeats.
const PROGRESS_SOURCE_RESOLVED: i16 = 25;
const PROGRESS_RENDERED: i16 = 75;

/// Shared context handed to each worker so it can reach the queue and the
/// infrastructure capabilities.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<ScreenshotQueue>,
    pub renderer: Arc<RenderOrchestrator>,
    pub storage: Arc<PreviewStorage>,
    pub persister: Arc<ResultPersister>,
}

/// A fixed-size pool of job executors.
///
/// The pool size bounds concurrent renderer invocations: primary renders
/// spawn a full browser process each, so this is the system's backpressure
/// valve. Each worker runs one job to completion before claiming the next.
pub struct WorkerPool {
    context: WorkerContext,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(context: WorkerContext, concurrency: usize, poll_interval: Duration) -> Self {
        Self {
            context,
            concurrency: concurrency.max(1),
            poll_interval,
        }
    }

    /// Spawn the worker tasks. They stop claiming once `stop` flips to true
    /// and finish whatever job they hold.
    pub fn spawn(&self, stop: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.concurrency)
            .map(|index| {
                let name = format!("worker-{index}");
                let context = self.context.clone();
                let poll_interval = self.poll_interval;
                let stop = stop.clone();
                tokio::spawn(run_worker(name, context, poll_interval, stop))
            })
            .collect()
    }
}

async fn run_worker(
    name: String,
    context: WorkerContext,
    poll_interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    info!(
        target = "application::worker",
        worker = %name,
        "Worker started"
    );

    loop {
        if *stop.borrow() {
            break;
        }

        match context.queue.claim_next(&name).await {
            Ok(Some(job)) => process_job(&name, &context, &job).await,
            Ok(None) => {
                tokio::select! {
                    _ = context.queue.wait_for_work(poll_interval) => {}
                    _ = stop.changed() => {}
                }
            }
            Err(err) => {
                warn!(
                    target = "application::worker",
                    worker = %name,
                    error = %err,
                    "Failed to claim from the queue; backing off"
                );
                tokio::select! {
                    _ = sleep(poll_interval) => {}
                    _ = stop.changed() => {}
                }
            }
        }
    }

    info!(
        target = "application::worker",
        worker = %name,
        "Worker stopped"
    );
}

async fn process_job(worker: &str, context: &WorkerContext, job: &JobRecord) {
    let report = match execute_job(worker, context, job).await {
        Ok(image_url) => context.queue.report_success(job, &image_url).await,
        Err(error) => context.queue.report_failure(job, &error).await,
    };

    // A rejected report usually means the janitor recovered this job as
    // stalled while we were still holding it; another worker owns it now.
    if let Err(err) = report {
        warn!(
            target = "application::worker",
            worker,
            job_id = %job.id,
            error = %err,
            "Could not report job outcome"
        );
    }
}

async fn execute_job(
    worker: &str,
    context: &WorkerContext,
    job: &JobRecord,
) -> Result<String, JobError> {
    let payload: JobPayload = serde_json::from_value(job.payload.clone())
        .map_err(|err| JobError::fatal(format!("undecodable job payload: {err}")))?;

    let html = resolve_source(context, &payload.source).await?;
    let _ = context
        .queue
        .record_progress(job.id, PROGRESS_SOURCE_RESOLVED)
        .await;

    let bytes = context
        .renderer
        .render(&html)
        .await
        .map_err(|err| JobError::retryable(err.to_string()))?;
    let _ = context
        .queue
        .record_progress(job.id, PROGRESS_RENDERED)
        .await;

    let stored = context
        .storage
        .put(&format!("{}.png", job.id), bytes)
        .await
        .map_err(|err| JobError::retryable(format!("failed to store capture: {err}")))?;

    // The render already succeeded and the image exists in storage; a
    // persistence hiccup must not fail the job. The owning record's pointer
    // may lag until re-persisted out-of-band.
    if let Some(target) = &payload.target {
        if let Err(err) = context.persister.persist(target, &stored.url).await {
            warn!(
                target = "application::worker",
                worker,
                job_id = %job.id,
                entity_kind = target.kind.as_str(),
                entity_id = %target.id,
                error = %err,
                "Capture stored but preview persistence failed"
            );
        }
    }

    Ok(stored.url)
}

async fn resolve_source(
    context: &WorkerContext,
    source: &HtmlSource,
) -> Result<String, JobError> {
    match source {
        HtmlSource::Inline { html } => Ok(html.clone()),
        HtmlSource::Stored { key } => {
            let bytes = context.storage.get(key).await.map_err(|err| {
                if err.is_not_found() {
                    // Retrying cannot conjure a missing source object.
                    JobError::fatal(format!("stored HTML source missing: {err}"))
                } else {
                    JobError::retryable(format!("failed to fetch HTML source: {err}"))
                }
            })?;

            String::from_utf8(bytes.to_vec()).map_err(|err| {
                JobError::fatal(format!("stored HTML source is not valid UTF-8: {err}"))
            })
        }
    }
}
