use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tokio::time::sleep;
use tracing::{info, warn};

use super::types::{RenderError, Renderer};

const DEFAULT_PRIMARY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_PRIMARY_RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_FALLBACK_MAX_ATTEMPTS: u32 = 2;
const DEFAULT_FALLBACK_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Render-internal retry policy. Distinct from the queue's job-level
/// backoff: these attempts happen inside one job attempt and use fixed
/// delays.
#[derive(Debug, Clone)]
pub struct RenderPolicy {
    pub primary_max_attempts: u32,
    pub primary_retry_delay: Duration,
    pub fallback_max_attempts: u32,
    pub fallback_retry_delay: Duration,
}

impl Default for RenderPolicy {
    fn default() -> Self {
        Self {
            primary_max_attempts: DEFAULT_PRIMARY_MAX_ATTEMPTS,
            primary_retry_delay: DEFAULT_PRIMARY_RETRY_DELAY,
            fallback_max_attempts: DEFAULT_FALLBACK_MAX_ATTEMPTS,
            fallback_retry_delay: DEFAULT_FALLBACK_RETRY_DELAY,
        }
    }
}

/// Wraps the primary and fallback renderers behind one `render` call.
///
/// The primary is attempted up to `primary_max_attempts` times with a fixed
/// inter-attempt delay; a fresh engine instance backs every attempt. Once
/// the primary is exhausted, or reports itself unavailable, the fallback
/// runs with its own smaller attempt allowance. When both paths fail the
/// caller receives a composite error carrying both failure reasons.
pub struct RenderOrchestrator {
    primary: Arc<dyn Renderer>,
    fallback: Arc<dyn Renderer>,
    policy: RenderPolicy,
}

impl RenderOrchestrator {
    pub fn new(
        primary: Arc<dyn Renderer>,
        fallback: Arc<dyn Renderer>,
        policy: RenderPolicy,
    ) -> Self {
        Self {
            primary,
            fallback,
            policy,
        }
    }

    pub async fn render(&self, html: &str) -> Result<Bytes, RenderError> {
        let primary_error = match self.run_path(
            self.primary.as_ref(),
            html,
            self.policy.primary_max_attempts,
            self.policy.primary_retry_delay,
            "scatto_render_primary_attempts_total",
        )
        .await
        {
            Ok(bytes) => return Ok(bytes),
            Err(err) => err,
        };

        info!(
            target = "application::render::orchestrator",
            primary = self.primary.name(),
            fallback = self.fallback.name(),
            error = %primary_error,
            "Primary renderer exhausted; switching to fallback"
        );

        match self.run_path(
            self.fallback.as_ref(),
            html,
            self.policy.fallback_max_attempts,
            self.policy.fallback_retry_delay,
            "scatto_render_fallback_attempts_total",
        )
        .await
        {
            Ok(bytes) => Ok(bytes),
            Err(fallback_error) => Err(RenderError::Exhausted {
                primary: primary_error.to_string(),
                fallback: fallback_error.to_string(),
            }),
        }
    }

    async fn run_path(
        &self,
        renderer: &dyn Renderer,
        html: &str,
        max_attempts: u32,
        retry_delay: Duration,
        attempts_metric: &'static str,
    ) -> Result<Bytes, RenderError> {
        let mut last_error = RenderError::unavailable("no attempts configured");

        for attempt in 1..=max_attempts.max(1) {
            counter!(attempts_metric).increment(1);

            match renderer.render(html).await.and_then(validate_image) {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    warn!(
                        target = "application::render::orchestrator",
                        engine = renderer.name(),
                        attempt,
                        max_attempts,
                        error = %err,
                        "Render attempt failed"
                    );

                    let unavailable = err.is_unavailable();
                    last_error = err;
                    if unavailable {
                        break;
                    }
                    if attempt < max_attempts {
                        sleep(retry_delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }
}

/// Reject output the image sizer cannot parse; a zero-byte or truncated
/// capture counts as a failed attempt, not a success.
fn validate_image(bytes: Bytes) -> Result<Bytes, RenderError> {
    match imagesize::blob_size(&bytes) {
        Ok(_) => Ok(bytes),
        Err(err) => Err(RenderError::InvalidOutput {
            message: format!("{err} ({} bytes)", bytes.len()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    fn png_stub() -> Bytes {
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        data.extend_from_slice(&[0, 0, 0, 0]);
        Bytes::from(data)
    }

    enum Behaviour {
        Succeed,
        FailAlways,
        FailTimes(u32),
        Unavailable,
        EmptyOutput,
    }

    struct ScriptedRenderer {
        label: &'static str,
        behaviour: Behaviour,
        calls: AtomicU32,
    }

    impl ScriptedRenderer {
        fn new(label: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                label,
                behaviour,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Renderer for ScriptedRenderer {
        async fn render(&self, _html: &str) -> Result<Bytes, RenderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.behaviour {
                Behaviour::Succeed => Ok(png_stub()),
                Behaviour::FailAlways => Err(RenderError::Engine {
                    exit_code: Some(1),
                    stderr: "render crashed".to_string(),
                }),
                Behaviour::FailTimes(n) if call <= n => Err(RenderError::Engine {
                    exit_code: Some(1),
                    stderr: format!("crash on call {call}"),
                }),
                Behaviour::FailTimes(_) => Ok(png_stub()),
                Behaviour::Unavailable => {
                    Err(RenderError::unavailable("browser binary missing"))
                }
                Behaviour::EmptyOutput => Ok(Bytes::new()),
            }
        }

        fn name(&self) -> &'static str {
            self.label
        }
    }

    fn fast_policy() -> RenderPolicy {
        RenderPolicy {
            primary_max_attempts: 3,
            primary_retry_delay: Duration::from_millis(1),
            fallback_max_attempts: 2,
            fallback_retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn primary_success_never_touches_fallback() {
        let primary = ScriptedRenderer::new("primary", Behaviour::Succeed);
        let fallback = ScriptedRenderer::new("fallback", Behaviour::Succeed);
        let orchestrator =
            RenderOrchestrator::new(primary.clone(), fallback.clone(), fast_policy());

        let bytes = orchestrator.render("<p>ok</p>").await.expect("render");
        assert!(!bytes.is_empty());
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn primary_retries_before_succeeding() {
        let primary = ScriptedRenderer::new("primary", Behaviour::FailTimes(2));
        let fallback = ScriptedRenderer::new("fallback", Behaviour::Succeed);
        let orchestrator =
            RenderOrchestrator::new(primary.clone(), fallback.clone(), fast_policy());

        orchestrator.render("<p>ok</p>").await.expect("render");
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn fallback_runs_only_after_primary_exhaustion() {
        let primary = ScriptedRenderer::new("primary", Behaviour::FailAlways);
        let fallback = ScriptedRenderer::new("fallback", Behaviour::Succeed);
        let orchestrator =
            RenderOrchestrator::new(primary.clone(), fallback.clone(), fast_policy());

        orchestrator.render("<p>ok</p>").await.expect("render");
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn unavailable_primary_falls_back_without_retries() {
        let primary = ScriptedRenderer::new("primary", Behaviour::Unavailable);
        let fallback = ScriptedRenderer::new("fallback", Behaviour::Succeed);
        let orchestrator =
            RenderOrchestrator::new(primary.clone(), fallback.clone(), fast_policy());

        orchestrator.render("<p>ok</p>").await.expect("render");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn both_paths_exhausted_yields_composite_error() {
        let primary = ScriptedRenderer::new("primary", Behaviour::FailAlways);
        let fallback = ScriptedRenderer::new("fallback", Behaviour::FailAlways);
        let orchestrator =
            RenderOrchestrator::new(primary.clone(), fallback.clone(), fast_policy());

        let err = orchestrator
            .render("<p>ok</p>")
            .await
            .expect_err("both paths fail");
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 2);

        match err {
            RenderError::Exhausted { primary, fallback } => {
                assert!(primary.contains("render crashed"), "{primary}");
                assert!(fallback.contains("render crashed"), "{fallback}");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparsable_output_counts_as_a_failed_attempt() {
        let primary = ScriptedRenderer::new("primary", Behaviour::EmptyOutput);
        let fallback = ScriptedRenderer::new("fallback", Behaviour::Succeed);
        let orchestrator =
            RenderOrchestrator::new(primary.clone(), fallback.clone(), fast_policy());

        orchestrator.render("<p>ok</p>").await.expect("render");
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 1);
    }
}
