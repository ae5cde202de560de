//! Postgres job store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never receive
//! the same row; all transitions are guarded on the current state so a job
//! recovered by the janitor cannot be completed twice.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::PgRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{JobStore, NewJobRecord, RepoError, StalledJob};
use crate::domain::entities::{JobCounts, JobRecord};
use crate::domain::types::{JobId, JobState};

use super::{PostgresRepositories, map_sqlx_error};

const JOB_COLUMNS: &str = "id, payload, state::text AS state, priority, attempts, \
     max_attempts, progress, run_at, created_at, lock_at, lock_by, heartbeat_at, \
     done_at, image_url, last_error";

fn row_to_job(row: &PgRow) -> Result<JobRecord, RepoError> {
    let state: String = row.try_get("state").map_err(map_sqlx_error)?;
    let state = JobState::try_from(state.as_str())
        .map_err(|_| RepoError::from_persistence(format!("unknown job state `{state}`")))?;

    Ok(JobRecord {
        id: row.try_get::<Uuid, _>("id").map_err(map_sqlx_error)?,
        payload: row
            .try_get::<serde_json::Value, _>("payload")
            .map_err(map_sqlx_error)?,
        state,
        priority: row.try_get("priority").map_err(map_sqlx_error)?,
        attempts: row.try_get("attempts").map_err(map_sqlx_error)?,
        max_attempts: row.try_get("max_attempts").map_err(map_sqlx_error)?,
        progress: row.try_get("progress").map_err(map_sqlx_error)?,
        run_at: row.try_get("run_at").map_err(map_sqlx_error)?,
        created_at: row.try_get("created_at").map_err(map_sqlx_error)?,
        lock_at: row.try_get("lock_at").map_err(map_sqlx_error)?,
        lock_by: row.try_get("lock_by").map_err(map_sqlx_error)?,
        heartbeat_at: row.try_get("heartbeat_at").map_err(map_sqlx_error)?,
        done_at: row.try_get("done_at").map_err(map_sqlx_error)?,
        image_url: row.try_get("image_url").map_err(map_sqlx_error)?,
        last_error: row.try_get("last_error").map_err(map_sqlx_error)?,
    })
}

#[async_trait]
impl JobStore for PostgresRepositories {
    async fn insert_job(&self, job: NewJobRecord) -> Result<JobId, RepoError> {
        let id = Uuid::new_v4();

        let row = sqlx::query(
            r#"
            INSERT INTO screenshot_jobs (id, payload, state, priority, max_attempts, run_at)
            VALUES (
                $1,
                $2,
                CASE WHEN $5 > now() THEN 'delayed'::job_state ELSE 'waiting'::job_state END,
                $3,
                $4,
                $5
            )
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(job.max_attempts)
        .bind(job.run_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.try_get("id").map_err(map_sqlx_error)
    }

    async fn claim_next(&self, worker: &str) -> Result<Option<JobRecord>, RepoError> {
        let sql = format!(
            r#"
            UPDATE screenshot_jobs
               SET state = 'active'::job_state,
                   attempts = attempts + 1,
                   progress = 0,
                   lock_at = now(),
                   lock_by = $1,
                   heartbeat_at = now()
             WHERE id IN (
                SELECT id
                  FROM screenshot_jobs
                 WHERE state IN ('waiting'::job_state, 'delayed'::job_state)
                   AND run_at <= now()
                   AND attempts < max_attempts
                 ORDER BY priority ASC, run_at ASC, created_at ASC
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1
             )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(worker)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row_to_job(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn mark_completed(&self, id: JobId, image_url: &str) -> Result<(), RepoError> {
        let affected = sqlx::query(
            r#"
            UPDATE screenshot_jobs
               SET state = 'completed'::job_state,
                   progress = 100,
                   image_url = $2,
                   done_at = now(),
                   lock_at = NULL,
                   lock_by = NULL
             WHERE id = $1 AND state = 'active'::job_state
            "#,
        )
        .bind(id)
        .bind(image_url)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if affected == 0 {
            return Err(RepoError::InvalidState);
        }
        Ok(())
    }

    async fn mark_failed(&self, id: JobId, error: &str) -> Result<(), RepoError> {
        let affected = sqlx::query(
            r#"
            UPDATE screenshot_jobs
               SET state = 'failed'::job_state,
                   last_error = $2,
                   done_at = now(),
                   lock_at = NULL,
                   lock_by = NULL
             WHERE id = $1 AND state = 'active'::job_state
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if affected == 0 {
            return Err(RepoError::InvalidState);
        }
        Ok(())
    }

    async fn reschedule(
        &self,
        id: JobId,
        error: &str,
        run_at: OffsetDateTime,
    ) -> Result<(), RepoError> {
        let affected = sqlx::query(
            r#"
            UPDATE screenshot_jobs
               SET state = 'delayed'::job_state,
                   run_at = $3,
                   last_error = $2,
                   progress = 0,
                   lock_at = NULL,
                   lock_by = NULL,
                   heartbeat_at = NULL
             WHERE id = $1 AND state = 'active'::job_state
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(run_at)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        if affected == 0 {
            return Err(RepoError::InvalidState);
        }
        Ok(())
    }

    async fn record_progress(&self, id: JobId, progress: i16) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            UPDATE screenshot_jobs
               SET progress = $2,
                   heartbeat_at = now()
             WHERE id = $1 AND state = 'active'::job_state
            "#,
        )
        .bind(id)
        .bind(progress)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn find_job(&self, id: JobId) -> Result<Option<JobRecord>, RepoError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM screenshot_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row_to_job(&row).map(Some),
            None => Ok(None),
        }
    }

    async fn counts(&self) -> Result<JobCounts, RepoError> {
        let rows = sqlx::query(
            r#"
            SELECT state::text AS state, COUNT(*) AS total
              FROM screenshot_jobs
             GROUP BY state
            "#,
        )
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut counts = JobCounts::default();
        for row in rows {
            let state: String = row.try_get("state").map_err(map_sqlx_error)?;
            let total: i64 = row.try_get("total").map_err(map_sqlx_error)?;
            let total = total.max(0) as u64;
            match JobState::try_from(state.as_str()) {
                Ok(JobState::Waiting) => counts.waiting = total,
                Ok(JobState::Active) => counts.active = total,
                Ok(JobState::Completed) => counts.completed = total,
                Ok(JobState::Failed) => counts.failed = total,
                Ok(JobState::Delayed) => counts.delayed = total,
                Err(()) => {
                    return Err(RepoError::from_persistence(format!(
                        "unknown job state `{state}`"
                    )));
                }
            }
        }
        Ok(counts)
    }

    async fn release_stalled(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<StalledJob>, RepoError> {
        let rows = sqlx::query(
            r#"
            WITH stalled AS (
                SELECT id, attempts >= max_attempts AS exhausted
                  FROM screenshot_jobs
                 WHERE state = 'active'::job_state
                   AND (heartbeat_at IS NULL OR heartbeat_at < $1)
                 FOR UPDATE SKIP LOCKED
            )
            UPDATE screenshot_jobs j
               SET state = CASE WHEN s.exhausted
                                THEN 'failed'::job_state
                                ELSE 'waiting'::job_state END,
                   last_error = CASE WHEN s.exhausted
                                     THEN 'worker lost liveness with no attempts remaining'
                                     ELSE j.last_error END,
                   done_at = CASE WHEN s.exhausted THEN now() ELSE NULL END,
                   run_at = CASE WHEN s.exhausted THEN j.run_at ELSE now() END,
                   progress = 0,
                   lock_at = NULL,
                   lock_by = NULL,
                   heartbeat_at = NULL
              FROM stalled s
             WHERE j.id = s.id
            RETURNING j.id, s.exhausted
            "#,
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut released = Vec::with_capacity(rows.len());
        for row in rows {
            released.push(StalledJob {
                id: row.try_get("id").map_err(map_sqlx_error)?,
                exhausted: row.try_get("exhausted").map_err(map_sqlx_error)?,
            });
        }
        Ok(released)
    }

    async fn sweep(
        &self,
        completed_before: OffsetDateTime,
        failed_before: OffsetDateTime,
    ) -> Result<u64, RepoError> {
        let affected = sqlx::query(
            r#"
            DELETE FROM screenshot_jobs
             WHERE (state = 'completed'::job_state AND done_at < $1)
                OR (state = 'failed'::job_state AND done_at < $2)
            "#,
        )
        .bind(completed_before)
        .bind(failed_before)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        Ok(affected)
    }
}
