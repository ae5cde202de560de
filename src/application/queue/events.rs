//! Typed job lifecycle notifications.
//!
//! Downstream observability code subscribes to a bounded broadcast channel
//! instead of registering callbacks on the queue; a slow subscriber lags and
//! drops events rather than blocking job processing.

use tokio::sync::broadcast;
use tracing::info;

use crate::domain::types::JobId;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// A job lifecycle transition worth observing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Completed { id: JobId, image_url: String },
    Failed { id: JobId, error: String },
    Stalled { id: JobId },
}

impl JobEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Completed { .. } => "completed",
            JobEvent::Failed { .. } => "failed",
            JobEvent::Stalled { .. } => "stalled",
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Completed { id, .. }
            | JobEvent::Failed { id, .. }
            | JobEvent::Stalled { id } => *id,
        }
    }
}

/// Publish side of the lifecycle channel.
#[derive(Clone)]
pub struct JobEvents {
    sender: broadcast::Sender<JobEvent>,
}

impl JobEvents {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is normal and not an error.
    pub fn publish(&self, event: JobEvent) {
        info!(
            target = "application::queue::events",
            job_id = %event.job_id(),
            event = event.kind(),
            "Job lifecycle event"
        );

        let _ = self.sender.send(event);
    }
}

impl Default for JobEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let events = JobEvents::new();
        let mut rx = events.subscribe();

        let id = Uuid::new_v4();
        events.publish(JobEvent::Stalled { id });

        let received = rx.recv().await.expect("event");
        assert_eq!(received, JobEvent::Stalled { id });
    }

    #[test]
    fn publishing_without_subscribers_is_a_no_op() {
        let events = JobEvents::new();
        events.publish(JobEvent::Failed {
            id: Uuid::new_v4(),
            error: "boom".to_string(),
        });
    }

    #[tokio::test]
    async fn each_subscriber_sees_every_event() {
        let events = JobEvents::new();
        let mut a = events.subscribe();
        let mut b = events.subscribe();

        let id = Uuid::new_v4();
        events.publish(JobEvent::Completed {
            id,
            image_url: "https://cdn.example/previews/a.png".to_string(),
        });

        assert_eq!(a.recv().await.expect("a").job_id(), id);
        assert_eq!(b.recv().await.expect("b").job_id(), id);
    }
}
