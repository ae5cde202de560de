//! Render capability: a primary/fallback pair behind one `render` call.

mod orchestrator;
mod types;

pub use orchestrator::{RenderOrchestrator, RenderPolicy};
pub use types::{
    DEFAULT_SETTLE_DELAY, DEFAULT_VIEWPORT, RenderError, Renderer, Viewport,
};
