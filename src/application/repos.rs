//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::{JobCounts, JobRecord};
use crate::domain::types::{JobId, PreviewStatus};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("job is not in a state that permits this transition")]
    InvalidState,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

/// Parameters for inserting a new job row.
#[derive(Debug, Clone)]
pub struct NewJobRecord {
    pub payload: serde_json::Value,
    pub priority: i32,
    pub max_attempts: i32,
    pub run_at: OffsetDateTime,
}

/// A job released by stall recovery, with its post-release disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalledJob {
    pub id: JobId,
    /// True when attempts were already exhausted and the job went terminal
    /// `failed` instead of returning to `waiting`.
    pub exhausted: bool,
}

/// Durable store backing the screenshot queue.
///
/// Implementations must make `claim_next` mutually exclusive: no two
/// concurrent callers may receive the same job. The Postgres adapter uses
/// `FOR UPDATE SKIP LOCKED`; the in-memory adapter serialises claims behind
/// one mutex.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: NewJobRecord) -> Result<JobId, RepoError>;

    /// Claim the next ready job for `worker`: lowest priority value first,
    /// then earliest `run_at`. Claiming increments `attempts` and stamps the
    /// lock and heartbeat columns. Jobs whose attempts are exhausted are
    /// never handed out.
    async fn claim_next(&self, worker: &str) -> Result<Option<JobRecord>, RepoError>;

    /// Terminal success: records the image URL exactly once.
    async fn mark_completed(&self, id: JobId, image_url: &str) -> Result<(), RepoError>;

    /// Terminal failure: records the final error exactly once.
    async fn mark_failed(&self, id: JobId, error: &str) -> Result<(), RepoError>;

    /// Return an active job to the delayed pool for a later retry,
    /// preserving its original priority.
    async fn reschedule(
        &self,
        id: JobId,
        error: &str,
        run_at: OffsetDateTime,
    ) -> Result<(), RepoError>;

    /// Record observability progress and refresh the liveness heartbeat.
    /// A no-op for jobs that are not `active`.
    async fn record_progress(&self, id: JobId, progress: i16) -> Result<(), RepoError>;

    async fn find_job(&self, id: JobId) -> Result<Option<JobRecord>, RepoError>;

    async fn counts(&self) -> Result<JobCounts, RepoError>;

    /// Release active jobs whose heartbeat is older than `cutoff`. Jobs with
    /// remaining attempts return to `waiting`; exhausted ones go terminal
    /// `failed`.
    async fn release_stalled(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<StalledJob>, RepoError>;

    /// Delete terminal jobs past their retention windows. Returns the number
    /// of rows removed.
    async fn sweep(
        &self,
        completed_before: OffsetDateTime,
        failed_before: OffsetDateTime,
    ) -> Result<u64, RepoError>;
}

/// The update applied to an owning record after a successful render.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewPatch {
    pub image_url: String,
    pub status: PreviewStatus,
    pub updated_at: OffsetDateTime,
}

impl PreviewPatch {
    pub fn completed(image_url: impl Into<String>, updated_at: OffsetDateTime) -> Self {
        Self {
            image_url: image_url.into(),
            status: PreviewStatus::Completed,
            updated_at,
        }
    }
}

#[async_trait]
pub trait ListingsRepo: Send + Sync {
    /// Last-write-wins preview update. Returns false when no row matched.
    async fn update_preview(&self, id: Uuid, patch: &PreviewPatch) -> Result<bool, RepoError>;
}

#[async_trait]
pub trait UserPagesRepo: Send + Sync {
    async fn update_preview(&self, id: Uuid, patch: &PreviewPatch) -> Result<bool, RepoError>;
}

#[async_trait]
pub trait TemplatesRepo: Send + Sync {
    async fn update_preview(&self, id: Uuid, patch: &PreviewPatch) -> Result<bool, RepoError>;
}
