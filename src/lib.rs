//! Scatto renders stored HTML documents into raster preview images through an
//! asynchronous, durable job queue.
//!
//! The crate is split into the layers used across the codebase:
//!
//! - [`domain`]: job lifecycle types and invariants.
//! - [`application`]: queue service, worker pool, render orchestration, and
//!   the repository contracts they depend on.
//! - [`infra`]: Postgres and in-memory store implementations, preview
//!   storage, renderer adapters, and telemetry bootstrap.
//! - [`config`]: layered settings (file → environment → CLI).

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
