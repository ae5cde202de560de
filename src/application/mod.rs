//! Application services layer: queue, workers, rendering, persistence.

pub mod error;
pub mod janitor;
pub mod persist;
pub mod queue;
pub mod render;
pub mod repos;
pub mod service;
pub mod worker;
