//! In-process store implementations.
//!
//! Backs the queue and target repositories with mutex-guarded maps. Used by
//! the test suite and by single-node embeddings that do not need durability
//! across restarts; production deployments use
//! [`crate::infra::db::PostgresRepositories`].

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::application::repos::{
    JobStore, ListingsRepo, NewJobRecord, PreviewPatch, RepoError, StalledJob, TemplatesRepo,
    UserPagesRepo,
};
use crate::domain::entities::{JobCounts, JobRecord};
use crate::domain::types::{JobId, JobState, PreviewStatus};

const SOURCE: &str = "infra::memory";

/// Preview columns of an owning record, as the persister sees them.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewRow {
    pub preview_image_url: Option<String>,
    pub preview_status: PreviewStatus,
    pub preview_updated_at: Option<OffsetDateTime>,
}

impl PreviewRow {
    fn pending() -> Self {
        Self {
            preview_image_url: None,
            preview_status: PreviewStatus::Pending,
            preview_updated_at: None,
        }
    }
}

/// Mutex-guarded job queue plus the three preview target tables.
#[derive(Default)]
pub struct MemoryRepositories {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    page_listings: Mutex<HashMap<Uuid, PreviewRow>>,
    user_pages: Mutex<HashMap<Uuid, PreviewRow>>,
    templates: Mutex<HashMap<Uuid, PreviewRow>>,
}

impl MemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_page_listing(&self, id: Uuid) {
        lock(&self.page_listings, "seed_page_listing").insert(id, PreviewRow::pending());
    }

    pub fn seed_user_page(&self, id: Uuid) {
        lock(&self.user_pages, "seed_user_page").insert(id, PreviewRow::pending());
    }

    pub fn seed_template(&self, id: Uuid) {
        lock(&self.templates, "seed_template").insert(id, PreviewRow::pending());
    }

    pub fn page_listing(&self, id: Uuid) -> Option<PreviewRow> {
        lock(&self.page_listings, "page_listing").get(&id).cloned()
    }

    pub fn user_page(&self, id: Uuid) -> Option<PreviewRow> {
        lock(&self.user_pages, "user_page").get(&id).cloned()
    }

    pub fn template(&self, id: Uuid) -> Option<PreviewRow> {
        lock(&self.templates, "template").get(&id).cloned()
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = SOURCE,
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned store lock"
            );
            poisoned.into_inner()
        }
    }
}

fn apply_preview_patch(
    table: &Mutex<HashMap<Uuid, PreviewRow>>,
    op: &'static str,
    id: Uuid,
    patch: &PreviewPatch,
) -> Result<bool, RepoError> {
    let mut rows = lock(table, op);
    match rows.get_mut(&id) {
        Some(row) => {
            row.preview_image_url = Some(patch.image_url.clone());
            row.preview_status = patch.status;
            row.preview_updated_at = Some(patch.updated_at);
            Ok(true)
        }
        None => Ok(false),
    }
}

#[async_trait]
impl JobStore for MemoryRepositories {
    async fn insert_job(&self, job: NewJobRecord) -> Result<JobId, RepoError> {
        let now = OffsetDateTime::now_utc();
        let id = Uuid::new_v4();
        let state = if job.run_at > now {
            JobState::Delayed
        } else {
            JobState::Waiting
        };

        lock(&self.jobs, "insert_job").insert(
            id,
            JobRecord {
                id,
                payload: job.payload,
                state,
                priority: job.priority,
                attempts: 0,
                max_attempts: job.max_attempts,
                progress: 0,
                run_at: job.run_at,
                created_at: now,
                lock_at: None,
                lock_by: None,
                heartbeat_at: None,
                done_at: None,
                image_url: None,
                last_error: None,
            },
        );

        Ok(id)
    }

    async fn claim_next(&self, worker: &str) -> Result<Option<JobRecord>, RepoError> {
        let now = OffsetDateTime::now_utc();
        let mut jobs = lock(&self.jobs, "claim_next");

        // Scan and state flip share one guard; claims stay exclusive.
        let next = jobs
            .values()
            .filter(|job| {
                matches!(job.state, JobState::Waiting | JobState::Delayed)
                    && job.run_at <= now
                    && job.attempts < job.max_attempts
            })
            .min_by_key(|job| (job.priority, job.run_at, job.created_at))
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let job = jobs
            .get_mut(&id)
            .ok_or(RepoError::NotFound)?;
        job.state = JobState::Active;
        job.attempts += 1;
        job.progress = 0;
        job.lock_at = Some(now);
        job.lock_by = Some(worker.to_string());
        job.heartbeat_at = Some(now);

        Ok(Some(job.clone()))
    }

    async fn mark_completed(&self, id: JobId, image_url: &str) -> Result<(), RepoError> {
        let mut jobs = lock(&self.jobs, "mark_completed");
        let job = jobs.get_mut(&id).ok_or(RepoError::NotFound)?;
        if job.state != JobState::Active {
            return Err(RepoError::InvalidState);
        }

        job.state = JobState::Completed;
        job.progress = 100;
        job.image_url = Some(image_url.to_string());
        job.done_at = Some(OffsetDateTime::now_utc());
        job.lock_at = None;
        job.lock_by = None;
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, error: &str) -> Result<(), RepoError> {
        let mut jobs = lock(&self.jobs, "mark_failed");
        let job = jobs.get_mut(&id).ok_or(RepoError::NotFound)?;
        if job.state != JobState::Active {
            return Err(RepoError::InvalidState);
        }

        job.state = JobState::Failed;
        job.last_error = Some(error.to_string());
        job.done_at = Some(OffsetDateTime::now_utc());
        job.lock_at = None;
        job.lock_by = None;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: JobId,
        error: &str,
        run_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        let mut jobs = lock(&self.jobs, "reschedule");
        let job = jobs.get_mut(&id).ok_or(RepoError::NotFound)?;
        if job.state != JobState::Active {
            return Err(RepoError::InvalidState);
        }

        job.state = JobState::Delayed;
        job.run_at = run_at;
        job.last_error = Some(error.to_string());
        job.progress = 0;
        job.lock_at = None;
        job.lock_by = None;
        job.heartbeat_at = None;
        Ok(())
    }

    async fn record_progress(&self, id: JobId, progress: i16) -> Result<(), RepoError> {
        let mut jobs = lock(&self.jobs, "record_progress");
        if let Some(job) = jobs.get_mut(&id) {
            if job.state == JobState::Active {
                job.progress = progress;
                job.heartbeat_at = Some(OffsetDateTime::now_utc());
            }
        }
        Ok(())
    }

    async fn find_job(&self, id: JobId) -> Result<Option<JobRecord>, RepoError> {
        Ok(lock(&self.jobs, "find_job").get(&id).cloned())
    }

    async fn counts(&self) -> Result<JobCounts, RepoError> {
        let jobs = lock(&self.jobs, "counts");
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Delayed => counts.delayed += 1,
            }
        }
        Ok(counts)
    }

    async fn release_stalled(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<StalledJob>, RepoError> {
        let mut jobs = lock(&self.jobs, "release_stalled");
        let mut released = Vec::new();

        for job in jobs.values_mut() {
            if job.state != JobState::Active {
                continue;
            }
            let stale = match job.heartbeat_at {
                Some(heartbeat) => heartbeat < cutoff,
                None => true,
            };
            if !stale {
                continue;
            }

            let exhausted = job.attempts >= job.max_attempts;
            if exhausted {
                job.state = JobState::Failed;
                job.last_error =
                    Some("worker lost liveness with no attempts remaining".to_string());
                job.done_at = Some(OffsetDateTime::now_utc());
            } else {
                job.state = JobState::Waiting;
                job.run_at = OffsetDateTime::now_utc();
                job.progress = 0;
            }
            job.lock_at = None;
            job.lock_by = None;
            job.heartbeat_at = None;

            released.push(StalledJob {
                id: job.id,
                exhausted,
            });
        }

        Ok(released)
    }

    async fn sweep(
        &self,
        completed_before: OffsetDateTime,
        failed_before: OffsetDateTime,
    ) -> Result<u64, RepoError> {
        let mut jobs = lock(&self.jobs, "sweep");
        let before = jobs.len();
        jobs.retain(|_, job| match (job.state, job.done_at) {
            (JobState::Completed, Some(done_at)) => done_at >= completed_before,
            (JobState::Failed, Some(done_at)) => done_at >= failed_before,
            _ => true,
        });
        Ok((before - jobs.len()) as u64)
    }
}

#[async_trait]
impl ListingsRepo for MemoryRepositories {
    async fn update_preview(&self, id: Uuid, patch: &PreviewPatch) -> Result<bool, RepoError> {
        apply_preview_patch(&self.page_listings, "update_listing_preview", id, patch)
    }
}

#[async_trait]
impl UserPagesRepo for MemoryRepositories {
    async fn update_preview(&self, id: Uuid, patch: &PreviewPatch) -> Result<bool, RepoError> {
        apply_preview_patch(&self.user_pages, "update_user_page_preview", id, patch)
    }
}

#[async_trait]
impl TemplatesRepo for MemoryRepositories {
    async fn update_preview(&self, id: Uuid, patch: &PreviewPatch) -> Result<bool, RepoError> {
        apply_preview_patch(&self.templates, "update_template_preview", id, patch)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn new_job(priority: i32, run_at: OffsetDateTime) -> NewJobRecord {
        NewJobRecord {
            payload: serde_json::json!({}),
            priority,
            max_attempts: 3,
            run_at,
        }
    }

    #[tokio::test]
    async fn claims_honour_priority_then_run_at() {
        let store = MemoryRepositories::new();
        let now = OffsetDateTime::now_utc();

        let low = store.insert_job(new_job(10, now)).await.expect("insert");
        let high = store.insert_job(new_job(1, now)).await.expect("insert");

        let first = store.claim_next("w1").await.expect("claim").expect("job");
        let second = store.claim_next("w1").await.expect("claim").expect("job");
        assert_eq!(first.id, high);
        assert_eq!(second.id, low);
    }

    #[tokio::test]
    async fn delayed_jobs_are_not_claimable_early() {
        let store = MemoryRepositories::new();
        let future = OffsetDateTime::now_utc() + Duration::from_secs(60);

        store.insert_job(new_job(0, future)).await.expect("insert");
        assert!(store.claim_next("w1").await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn claiming_increments_attempts_and_stamps_the_lock() {
        let store = MemoryRepositories::new();
        let id = store
            .insert_job(new_job(0, OffsetDateTime::now_utc()))
            .await
            .expect("insert");

        let job = store.claim_next("w7").await.expect("claim").expect("job");
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.state, JobState::Active);
        assert_eq!(job.lock_by.as_deref(), Some("w7"));
        assert!(job.heartbeat_at.is_some());
    }

    #[tokio::test]
    async fn concurrent_claims_never_hand_out_the_same_job() {
        let store = Arc::new(MemoryRepositories::new());
        let now = OffsetDateTime::now_utc();

        let mut expected = HashSet::new();
        for _ in 0..3 {
            expected.insert(store.insert_job(new_job(0, now)).await.expect("insert"));
        }

        let mut handles = Vec::new();
        for worker in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .claim_next(&format!("w{worker}"))
                    .await
                    .expect("claim")
            }));
        }

        let mut claimed = HashSet::new();
        for handle in handles {
            if let Some(job) = handle.await.expect("join") {
                assert!(claimed.insert(job.id), "job {} claimed twice", job.id);
            }
        }
        assert_eq!(claimed, expected);
    }

    #[tokio::test]
    async fn exhausted_jobs_are_never_handed_out() {
        let store = MemoryRepositories::new();
        let now = OffsetDateTime::now_utc();
        let id = store
            .insert_job(NewJobRecord {
                payload: serde_json::json!({}),
                priority: 0,
                max_attempts: 1,
                run_at: now,
            })
            .await
            .expect("insert");

        let job = store.claim_next("w1").await.expect("claim").expect("job");
        store
            .reschedule(job.id, "boom", now)
            .await
            .expect("reschedule");

        assert!(store.claim_next("w1").await.expect("claim").is_none());
        let job = store.find_job(id).await.expect("find").expect("job");
        assert_eq!(job.attempts, job.max_attempts);
    }

    #[tokio::test]
    async fn terminal_transitions_reject_non_active_jobs() {
        let store = MemoryRepositories::new();
        let id = store
            .insert_job(new_job(0, OffsetDateTime::now_utc()))
            .await
            .expect("insert");

        let err = store
            .mark_completed(id, "https://cdn.example/x.png")
            .await
            .expect_err("not active");
        assert!(matches!(err, RepoError::InvalidState));
    }

    #[tokio::test]
    async fn release_stalled_requeues_or_fails_by_attempts() {
        let store = MemoryRepositories::new();
        let now = OffsetDateTime::now_utc();

        let fresh = store.insert_job(new_job(0, now)).await.expect("insert");
        let spent = store
            .insert_job(NewJobRecord {
                payload: serde_json::json!({}),
                priority: 1,
                max_attempts: 1,
                run_at: now,
            })
            .await
            .expect("insert");

        store.claim_next("w1").await.expect("claim").expect("job");
        store.claim_next("w2").await.expect("claim").expect("job");

        let cutoff = OffsetDateTime::now_utc() + Duration::from_secs(1);
        let released = store.release_stalled(cutoff).await.expect("release");
        assert_eq!(released.len(), 2);

        let fresh_job = store.find_job(fresh).await.expect("find").expect("job");
        assert_eq!(fresh_job.state, JobState::Waiting);

        let spent_job = store.find_job(spent).await.expect("find").expect("job");
        assert_eq!(spent_job.state, JobState::Failed);
    }

    #[tokio::test]
    async fn sweep_respects_both_retention_windows() {
        let store = MemoryRepositories::new();
        let now = OffsetDateTime::now_utc();

        let done = store.insert_job(new_job(0, now)).await.expect("insert");
        let dead = store.insert_job(new_job(0, now)).await.expect("insert");

        let job = store.claim_next("w1").await.expect("claim").expect("job");
        store
            .mark_completed(job.id, "https://cdn.example/x.png")
            .await
            .expect("complete");
        let job = store.claim_next("w1").await.expect("claim").expect("job");
        store.mark_failed(job.id, "boom").await.expect("fail");

        let long_ago = now - Duration::from_secs(3600);
        assert_eq!(store.sweep(long_ago, long_ago).await.expect("sweep"), 0);

        let future = now + Duration::from_secs(3600);
        let removed = store.sweep(future, long_ago).await.expect("sweep");
        assert_eq!(removed, 1);
        assert!(store.find_job(done).await.expect("find").is_none());
        assert!(store.find_job(dead).await.expect("find").is_some());
    }

    #[tokio::test]
    async fn preview_updates_are_last_write_wins() {
        let store = MemoryRepositories::new();
        let id = Uuid::new_v4();
        store.seed_template(id);

        let patch = PreviewPatch::completed(
            "https://cdn.example/previews/t.png",
            OffsetDateTime::now_utc(),
        );
        assert!(
            TemplatesRepo::update_preview(&store, id, &patch)
                .await
                .expect("update")
        );

        let row = store.template(id).expect("row");
        assert_eq!(
            row.preview_image_url.as_deref(),
            Some("https://cdn.example/previews/t.png")
        );
        assert_eq!(row.preview_status, PreviewStatus::Completed);

        assert!(
            !TemplatesRepo::update_preview(&store, Uuid::new_v4(), &patch)
                .await
                .expect("missing row")
        );
    }
}
