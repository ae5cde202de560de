use async_trait::async_trait;
use bytes::Bytes;

use crate::application::render::{RenderError, Renderer};

/// Placeholder for a render path that is not configured in this deployment.
/// Always reports itself unavailable, so the orchestrator surfaces the other
/// path's failure instead of retrying a dead end.
pub struct DisabledRenderer {
    reason: &'static str,
}

impl DisabledRenderer {
    pub fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

#[async_trait]
impl Renderer for DisabledRenderer {
    async fn render(&self, _html: &str) -> Result<Bytes, RenderError> {
        Err(RenderError::unavailable(self.reason))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}
