use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// Capture viewport. Full-page output grows past `height` when the document
/// overflows; `height` only sets the initial layout viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scale: u32,
}

pub const DEFAULT_VIEWPORT: Viewport = Viewport {
    width: 1280,
    height: 1024,
    scale: 1,
};

/// Quiet period after load/network-idle before capture. Scripted pages keep
/// mutating the DOM after the network goes idle; capturing earlier yields
/// blank or partial screenshots.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer unavailable: {message}")]
    Unavailable { message: String },
    #[error("renderer exited abnormally (exit {exit_code:?}): {stderr}")]
    Engine {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("render timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("rendering API returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("rendering API quota exhausted (HTTP {status})")]
    Quota { status: u16 },
    #[error("rendering API request failed: {message}")]
    Network { message: String },
    #[error("renderer produced unusable output: {message}")]
    InvalidOutput { message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("all render paths exhausted; primary: {primary}; fallback: {fallback}")]
    Exhausted { primary: String, fallback: String },
}

impl RenderError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Unavailability (missing browser binary) is not worth retrying on the
    /// same path; the orchestrator falls back immediately.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// One HTML-to-image engine invocation. Implementations are stateless per
/// call: each attempt launches a fresh engine instance and tears it down so
/// no page state leaks between jobs.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, html: &str) -> Result<Bytes, RenderError>;

    /// Short label used in logs and composite errors.
    fn name(&self) -> &'static str;
}
