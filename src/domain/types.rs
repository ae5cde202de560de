//! Shared domain enumerations aligned with persisted database enums.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue-assigned job identifier.
pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
    Delayed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl TryFrom<&str> for JobState {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "delayed" => Ok(JobState::Delayed),
            _ => Err(()),
        }
    }
}

/// The closed set of record kinds a finished preview can be written back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    PageListing,
    UserPage,
    Template,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::PageListing => "page_listing",
            TargetKind::UserPage => "user_page",
            TargetKind::Template => "template",
        }
    }
}

impl TryFrom<&str> for TargetKind {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "page_listing" => Ok(TargetKind::PageListing),
            "user_page" => Ok(TargetKind::UserPage),
            "template" => Ok(TargetKind::Template),
            _ => Err(()),
        }
    }
}

/// Preview state recorded on the owning record.
///
/// The pipeline only ever writes `Completed`; a failed job leaves the owning
/// record untouched so "no preview yet" stays distinguishable from "preview
/// generation failed" via job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "preview_status", rename_all = "snake_case")]
pub enum PreviewStatus {
    Pending,
    Completed,
}

impl PreviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PreviewStatus::Pending => "pending",
            PreviewStatus::Completed => "completed",
        }
    }
}

/// Identifies the record a finished render is persisted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderTarget {
    pub kind: TargetKind,
    pub id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_round_trips_through_str() {
        for state in [
            JobState::Waiting,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
            JobState::Delayed,
        ] {
            assert_eq!(JobState::try_from(state.as_str()), Ok(state));
        }
        assert!(JobState::try_from("leased").is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(!JobState::Delayed.is_terminal());
    }

    #[test]
    fn target_kind_rejects_unknown_tags() {
        assert_eq!(
            TargetKind::try_from("user_page"),
            Ok(TargetKind::UserPage)
        );
        assert!(TargetKind::try_from("blog_post").is_err());
    }
}
