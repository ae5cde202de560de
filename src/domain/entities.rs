//! Domain entities mirrored from persistent storage.

use serde::Serialize;
use time::OffsetDateTime;

use crate::domain::types::{JobId, JobState};

/// A screenshot job as stored by the queue.
///
/// `payload` stays as raw JSON here; workers decode it into
/// [`crate::domain::jobs::JobPayload`] when processing so that an
/// undecodable payload is a handled failure path rather than a claim error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    /// 0–100, written by workers for observability only. Progress writes
    /// double as liveness heartbeats.
    pub progress: i16,
    pub run_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub lock_at: Option<OffsetDateTime>,
    pub lock_by: Option<String>,
    pub heartbeat_at: Option<OffsetDateTime>,
    pub done_at: Option<OffsetDateTime>,
    pub image_url: Option<String>,
    pub last_error: Option<String>,
}

/// Point-in-time queue depth by state. Best-effort under concurrent
/// mutation, never authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl JobCounts {
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}
