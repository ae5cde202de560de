//! Assembles the queue, worker pool, and janitor into one owned service.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::application::janitor::QueueJanitor;
use crate::application::persist::ResultPersister;
use crate::application::queue::ScreenshotQueue;
use crate::application::render::RenderOrchestrator;
use crate::application::repos::RepoError;
use crate::application::worker::{WorkerContext, WorkerPool};
use crate::domain::entities::JobCounts;
use crate::domain::jobs::{EnqueueOptions, HtmlSource};
use crate::domain::types::{JobId, RenderTarget};
use crate::infra::storage::PreviewStorage;

const DEFAULT_WORKER_CONCURRENCY: usize = 3;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct ScreenshotServiceConfig {
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    pub liveness_check_interval: Duration,
    pub sweep_interval: Duration,
}

impl Default for ScreenshotServiceConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            liveness_check_interval: DEFAULT_LIVENESS_CHECK_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// The screenshot pipeline as one explicitly constructed object.
///
/// Owns the queue handle, worker pool, and janitor; nothing here is process
/// global. Lifecycle is explicit: [`start`](Self::start) spawns the
/// background tasks, [`drain`](Self::drain) stops claiming and waits for
/// in-flight jobs, [`shutdown`](Self::shutdown) aborts immediately.
pub struct ScreenshotService {
    queue: Arc<ScreenshotQueue>,
    pool: WorkerPool,
    config: ScreenshotServiceConfig,
    stop: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    janitor: Option<JoinHandle<()>>,
}

impl ScreenshotService {
    pub fn new(
        queue: Arc<ScreenshotQueue>,
        renderer: Arc<RenderOrchestrator>,
        storage: Arc<PreviewStorage>,
        persister: Arc<ResultPersister>,
        config: ScreenshotServiceConfig,
    ) -> Self {
        let context = WorkerContext {
            queue: queue.clone(),
            renderer,
            storage,
            persister,
        };
        let pool = WorkerPool::new(context, config.worker_concurrency, config.poll_interval);
        let (stop, _) = watch::channel(false);

        Self {
            queue,
            pool,
            config,
            stop,
            workers: Vec::new(),
            janitor: None,
        }
    }

    pub fn queue(&self) -> &Arc<ScreenshotQueue> {
        &self.queue
    }

    /// The sole entry point business code uses to request a screenshot.
    pub async fn enqueue_screenshot_job(
        &self,
        source: HtmlSource,
        target: Option<RenderTarget>,
        options: EnqueueOptions,
    ) -> Result<JobId, RepoError> {
        self.queue.enqueue(source, target, options).await
    }

    pub async fn queue_stats(&self) -> Result<JobCounts, RepoError> {
        self.queue.stats().await
    }

    /// Spawn the worker pool and janitor. Idempotent.
    pub fn start(&mut self) {
        if !self.workers.is_empty() {
            return;
        }

        self.workers = self.pool.spawn(self.stop.subscribe());
        self.janitor = Some(
            QueueJanitor::new(
                self.queue.clone(),
                self.config.liveness_check_interval,
                self.config.sweep_interval,
            )
            .spawn(self.stop.subscribe()),
        );

        info!(
            target = "application::service",
            workers = self.config.worker_concurrency,
            "Screenshot service started"
        );
    }

    /// Stop claiming new jobs and wait for in-flight work to finish.
    pub async fn drain(mut self) {
        let _ = self.stop.send(true);

        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }
        if let Some(janitor) = self.janitor.take() {
            let _ = janitor.await;
        }

        info!(target = "application::service", "Screenshot service drained");
    }

    /// Abort everything immediately, abandoning in-flight jobs. The stall
    /// janitor of the next process recovers whatever was active.
    pub fn shutdown(mut self) {
        let _ = self.stop.send(true);

        for handle in self.workers.drain(..) {
            handle.abort();
        }
        if let Some(janitor) = self.janitor.take() {
            janitor.abort();
        }

        info!(target = "application::service", "Screenshot service shut down");
    }
}
