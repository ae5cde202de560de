//! Postgres store integration tests.
//!
//! These run against a live database and skip themselves when
//! `DATABASE_URL` is not set.

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use time::OffsetDateTime;
use uuid::Uuid;

use scatto::application::queue::{QueuePolicy, ScreenshotQueue};
use scatto::application::repos::{
    JobStore, ListingsRepo, NewJobRecord, PreviewPatch, RepoError,
};
use scatto::domain::jobs::{EnqueueOptions, HtmlSource, JobError};
use scatto::domain::types::JobState;
use scatto::infra::db::PostgresRepositories;

async fn setup() -> Option<PostgresRepositories> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("skipping postgres integration test: DATABASE_URL not set");
        return None;
    };

    let pool = PostgresRepositories::connect(&database_url, 5)
        .await
        .expect("connect");
    PostgresRepositories::run_migrations(&pool)
        .await
        .expect("migrations");

    sqlx::query("TRUNCATE TABLE screenshot_jobs, page_listings, user_pages, templates")
        .execute(&pool)
        .await
        .expect("clean slate");

    Some(PostgresRepositories::new(pool))
}

fn new_job(max_attempts: i32) -> NewJobRecord {
    NewJobRecord {
        payload: serde_json::json!({
            "source": { "inline": { "html": "<h1>hello</h1>" } },
        }),
        priority: 0,
        max_attempts,
        run_at: OffsetDateTime::now_utc(),
    }
}

#[tokio::test]
#[serial]
async fn enqueue_claim_and_complete() {
    let Some(repos) = setup().await else { return };

    let id = repos.insert_job(new_job(3)).await.expect("insert");

    let job = repos
        .claim_next("itest-worker")
        .await
        .expect("claim")
        .expect("job");
    assert_eq!(job.id, id);
    assert_eq!(job.state, JobState::Active);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.lock_by.as_deref(), Some("itest-worker"));

    // A second claim finds nothing while the job is held.
    assert!(repos.claim_next("other").await.expect("claim").is_none());

    repos
        .mark_completed(id, "https://cdn.example/previews/x.png")
        .await
        .expect("complete");

    let job = repos.find_job(id).await.expect("find").expect("job");
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(
        job.image_url.as_deref(),
        Some("https://cdn.example/previews/x.png")
    );

    // The terminal result is written exactly once.
    let err = repos
        .mark_completed(id, "https://cdn.example/previews/y.png")
        .await
        .expect_err("already terminal");
    assert!(matches!(err, RepoError::InvalidState));
}

#[tokio::test]
#[serial]
async fn queue_retries_with_backoff_then_fails_terminally() {
    let Some(repos) = setup().await else { return };

    let queue = ScreenshotQueue::new(
        Arc::new(repos),
        QueuePolicy {
            backoff_base: Duration::from_millis(10),
            default_max_attempts: 2,
            ..QueuePolicy::default()
        },
    );

    let id = queue
        .enqueue(
            HtmlSource::Inline {
                html: "<h1>hello</h1>".to_string(),
            },
            None,
            EnqueueOptions::default(),
        )
        .await
        .expect("enqueue");

    let job = queue
        .claim_next("itest-worker")
        .await
        .expect("claim")
        .expect("job");
    queue
        .report_failure(&job, &JobError::retryable("boom"))
        .await
        .expect("report");

    let job = queue.find_job(id).await.expect("find").expect("job");
    assert_eq!(job.state, JobState::Delayed);
    assert_eq!(job.last_error.as_deref(), Some("boom"));

    // Wait out the backoff, then exhaust the final attempt.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let job = queue
        .claim_next("itest-worker")
        .await
        .expect("claim")
        .expect("job");
    assert_eq!(job.attempts, 2);
    queue
        .report_failure(&job, &JobError::retryable("boom again"))
        .await
        .expect("report");

    let job = queue.find_job(id).await.expect("find").expect("job");
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.last_error.as_deref(), Some("boom again"));

    // Dead jobs are not claimable.
    assert!(
        queue
            .claim_next("itest-worker")
            .await
            .expect("claim")
            .is_none()
    );
}

#[tokio::test]
#[serial]
async fn stalled_active_jobs_are_released_for_reclaim() {
    let Some(repos) = setup().await else { return };

    let id = repos.insert_job(new_job(3)).await.expect("insert");
    repos
        .claim_next("itest-worker")
        .await
        .expect("claim")
        .expect("job");

    let cutoff = OffsetDateTime::now_utc() + Duration::from_secs(1);
    let released = repos.release_stalled(cutoff).await.expect("release");
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].id, id);
    assert!(!released[0].exhausted);

    let job = repos
        .claim_next("second-worker")
        .await
        .expect("claim")
        .expect("job");
    assert_eq!(job.id, id);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.lock_by.as_deref(), Some("second-worker"));
}

#[tokio::test]
#[serial]
async fn sweep_removes_only_expired_terminal_jobs() {
    let Some(repos) = setup().await else { return };

    let completed = repos.insert_job(new_job(3)).await.expect("insert");
    let job = repos
        .claim_next("itest-worker")
        .await
        .expect("claim")
        .expect("job");
    repos
        .mark_completed(job.id, "https://cdn.example/previews/x.png")
        .await
        .expect("complete");

    let failed = repos.insert_job(new_job(3)).await.expect("insert");
    let job = repos
        .claim_next("itest-worker")
        .await
        .expect("claim")
        .expect("job");
    repos.mark_failed(job.id, "boom").await.expect("fail");

    let now = OffsetDateTime::now_utc();
    let removed = repos
        .sweep(now + Duration::from_secs(60), now - Duration::from_secs(60))
        .await
        .expect("sweep");
    assert_eq!(removed, 1);
    assert!(repos.find_job(completed).await.expect("find").is_none());
    assert!(repos.find_job(failed).await.expect("find").is_some());
}

#[tokio::test]
#[serial]
async fn preview_updates_are_idempotent() {
    let Some(repos) = setup().await else { return };

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO page_listings (id) VALUES ($1)")
        .bind(id)
        .execute(repos.pool())
        .await
        .expect("seed listing");

    let patch = PreviewPatch::completed(
        "https://cdn.example/previews/l.png",
        OffsetDateTime::now_utc(),
    );

    assert!(
        ListingsRepo::update_preview(&repos, id, &patch)
            .await
            .expect("first update")
    );
    assert!(
        ListingsRepo::update_preview(&repos, id, &patch)
            .await
            .expect("second update")
    );

    let row = sqlx::query_as::<_, (Option<String>, String)>(
        "SELECT preview_image_url, preview_status::text FROM page_listings WHERE id = $1",
    )
    .bind(id)
    .fetch_one(repos.pool())
    .await
    .expect("fetch");
    assert_eq!(
        row.0.as_deref(),
        Some("https://cdn.example/previews/l.png")
    );
    assert_eq!(row.1, "completed");

    // A vanished row is a no-op, not an error.
    assert!(
        !ListingsRepo::update_preview(&repos, Uuid::new_v4(), &patch)
            .await
            .expect("missing row")
    );
}
