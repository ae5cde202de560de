//! Durable screenshot queue: enqueue, claim, retry, and lifecycle events.

mod events;
mod policy;
mod service;

pub use events::{JobEvent, JobEvents};
pub use policy::QueuePolicy;
pub use service::ScreenshotQueue;
