use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "scatto_jobs_enqueued_total",
            Unit::Count,
            "Total number of screenshot jobs enqueued."
        );
        describe_counter!(
            "scatto_jobs_completed_total",
            Unit::Count,
            "Total number of screenshot jobs completed."
        );
        describe_counter!(
            "scatto_jobs_failed_total",
            Unit::Count,
            "Total number of screenshot jobs that failed terminally."
        );
        describe_counter!(
            "scatto_jobs_retried_total",
            Unit::Count,
            "Total number of job attempts rescheduled with backoff."
        );
        describe_counter!(
            "scatto_jobs_stalled_total",
            Unit::Count,
            "Total number of active jobs recovered after losing worker liveness."
        );
        describe_counter!(
            "scatto_jobs_swept_total",
            Unit::Count,
            "Total number of terminal jobs removed by retention sweeps."
        );
        describe_counter!(
            "scatto_render_primary_attempts_total",
            Unit::Count,
            "Total number of primary renderer attempts."
        );
        describe_counter!(
            "scatto_render_fallback_attempts_total",
            Unit::Count,
            "Total number of fallback renderer attempts."
        );
        describe_gauge!(
            "scatto_queue_depth",
            Unit::Count,
            "Jobs currently waiting, delayed, or active."
        );
        describe_histogram!(
            "scatto_job_ms",
            Unit::Milliseconds,
            "Wall-clock time from claim to completion per job."
        );
        describe_histogram!(
            "scatto_render_ms",
            Unit::Milliseconds,
            "Renderer invocation latency in milliseconds."
        );
    });
}
