//! Job payload shapes exchanged between enqueuers, the queue, and workers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::types::RenderTarget;

/// Where the HTML document to render comes from.
///
/// Exactly one variant is present by construction; a `Stored` source is
/// fetched from preview storage and decoded as UTF-8 before rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HtmlSource {
    Inline { html: String },
    Stored { key: String },
}

/// The persisted body of a screenshot job.
///
/// `target` is optional: without it the job is fire-and-observe and the
/// caller retrieves the image URL from the finished job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub source: HtmlSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<RenderTarget>,
}

/// Caller-supplied knobs for a single enqueue.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Lower values dequeue first among otherwise-ready jobs.
    pub priority: i32,
    /// Hold the job back for this long before it becomes claimable.
    pub delay: Option<Duration>,
    /// Override the queue's default attempt ceiling.
    pub max_attempts: Option<i32>,
}

/// How a worker classifies a job failure when reporting it.
#[derive(Debug, Clone)]
pub struct JobError {
    message: String,
    retryable: bool,
}

impl JobError {
    /// A failure worth retrying with backoff (renderer exhaustion, storage
    /// write hiccups).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure no retry can fix (missing stored source, undecodable
    /// payload). The job goes terminal immediately.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}
