use std::time::Duration;

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(2000);
const DEFAULT_MAX_ATTEMPTS: i32 = 3;
const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_COMPLETED_RETENTION: Duration = Duration::from_secs(60 * 60);
const DEFAULT_FAILED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Caps the exponent so pathological attempt counts cannot overflow the
/// delay arithmetic.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Job-level queue policy: backoff between job attempts, the attempt
/// ceiling, liveness, and retention. Render-internal retries are governed
/// separately by [`crate::application::render::RenderPolicy`].
#[derive(Debug, Clone)]
pub struct QueuePolicy {
    /// Base for exponential backoff: `delay = base * 2^attempts`.
    pub backoff_base: Duration,
    pub default_max_attempts: i32,
    /// An active job whose heartbeat is older than this is presumed
    /// abandoned by a crashed worker and requeued.
    pub stall_timeout: Duration,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            stall_timeout: DEFAULT_STALL_TIMEOUT,
            completed_retention: DEFAULT_COMPLETED_RETENTION,
            failed_retention: DEFAULT_FAILED_RETENTION,
        }
    }
}

impl QueuePolicy {
    /// Delay before the next job attempt after `attempts_made` attempts.
    pub fn backoff_delay(&self, attempts_made: i32) -> Duration {
        let exponent = u32::try_from(attempts_made.max(0))
            .unwrap_or(MAX_BACKOFF_EXPONENT)
            .min(MAX_BACKOFF_EXPONENT);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}
