//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::render::{DEFAULT_SETTLE_DELAY, DEFAULT_VIEWPORT, Viewport};

#[cfg(test)]
mod tests;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "scatto";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_WORKER_CONCURRENCY: u32 = 3;
const DEFAULT_QUEUE_BACKOFF_BASE_MS: u64 = 2_000;
const DEFAULT_QUEUE_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_QUEUE_STALL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_COMPLETED_RETENTION_SECS: u64 = 60 * 60;
const DEFAULT_FAILED_RETENTION_SECS: u64 = 24 * 60 * 60;
const DEFAULT_BROWSER_PATH: &str = "chromium";
const DEFAULT_PRIMARY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_PRIMARY_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FALLBACK_MAX_ATTEMPTS: u32 = 2;
const DEFAULT_FALLBACK_RETRY_DELAY_MS: u64 = 2_000;
const DEFAULT_FALLBACK_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STORAGE_DIR: &str = "previews";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3000/previews";
const DEFAULT_LIVENESS_CHECK_SECS: u64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Command-line arguments for the Scatto binary.
#[derive(Debug, Parser)]
#[command(name = "scatto", version, about = "Scatto screenshot pipeline")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SCATTO_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the queue service: worker pool plus janitor, until interrupted.
    Serve(Box<ServeArgs>),
    /// Enqueue a single screenshot job.
    #[command(name = "enqueue")]
    Enqueue(EnqueueArgs),
    /// Print point-in-time queue counts.
    #[command(name = "stats")]
    Stats(StatsArgs),
    /// Run one retention sweep and exit.
    #[command(name = "sweep")]
    Sweep(SweepArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the worker pool size.
    #[arg(long = "workers-concurrency", value_name = "COUNT")]
    pub workers_concurrency: Option<u32>,

    /// Override the job retry backoff base in milliseconds.
    #[arg(long = "queue-backoff-base-ms", value_name = "MILLIS")]
    pub queue_backoff_base_ms: Option<u64>,

    /// Override the default job attempt ceiling.
    #[arg(long = "queue-max-attempts", value_name = "COUNT")]
    pub queue_max_attempts: Option<u32>,

    /// Override the stall-liveness timeout.
    #[arg(long = "queue-stall-timeout-seconds", value_name = "SECONDS")]
    pub queue_stall_timeout_seconds: Option<u64>,

    /// Override the headless browser executable path.
    #[arg(long = "render-browser-path", value_name = "PATH")]
    pub render_browser_path: Option<PathBuf>,

    /// Override the fallback rendering API endpoint.
    #[arg(long = "fallback-endpoint", value_name = "URL")]
    pub fallback_endpoint: Option<String>,

    /// Override the fallback rendering API key.
    #[arg(long = "fallback-api-key", value_name = "KEY", env = "SCATTO_FALLBACK_API_KEY")]
    pub fallback_api_key: Option<String>,

    /// Override the preview storage directory.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub storage_directory: Option<PathBuf>,

    /// Override the public URL prefix for stored previews.
    #[arg(long = "storage-public-base-url", value_name = "URL")]
    pub storage_public_base_url: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct EnqueueArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Path to an HTML file whose contents are enqueued inline.
    #[arg(long = "html-file", value_name = "FILE", value_hint = ValueHint::FilePath, conflicts_with = "stored_key")]
    pub html_file: Option<PathBuf>,

    /// Storage key of an already-uploaded HTML document.
    #[arg(long = "stored-key", value_name = "KEY")]
    pub stored_key: Option<String>,

    /// Target entity kind (page_listing|user_page|template).
    #[arg(long = "target-kind", value_name = "KIND", requires = "target_id")]
    pub target_kind: Option<String>,

    /// Target entity identifier.
    #[arg(long = "target-id", value_name = "UUID", requires = "target_kind")]
    pub target_id: Option<uuid::Uuid>,

    /// Lower values dequeue first.
    #[arg(long, default_value_t = 0)]
    pub priority: i32,

    /// Hold the job back for this many seconds.
    #[arg(long = "delay-seconds", value_name = "SECONDS")]
    pub delay_seconds: Option<u64>,

    /// Override the job attempt ceiling.
    #[arg(long = "max-attempts", value_name = "COUNT")]
    pub max_attempts: Option<i32>,
}

#[derive(Debug, Args, Clone)]
pub struct StatsArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub queue: QueueSettings,
    pub workers: WorkerSettings,
    pub render: RenderSettings,
    pub fallback: FallbackSettings,
    pub storage: StorageSettings,
    pub janitor: JanitorSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub backoff_base: Duration,
    pub max_attempts: NonZeroU32,
    pub stall_timeout: Duration,
    pub poll_interval: Duration,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub browser_path: PathBuf,
    pub primary_max_attempts: NonZeroU32,
    pub primary_retry_delay: Duration,
    pub hard_timeout: Duration,
    pub settle_delay: Duration,
    pub viewport: Viewport,
}

#[derive(Debug, Clone)]
pub struct FallbackSettings {
    pub endpoint: Option<Url>,
    pub api_key: Option<String>,
    pub max_attempts: NonZeroU32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl FallbackSettings {
    /// The fallback path needs both an endpoint and a key to be usable.
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && self.api_key.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub directory: PathBuf,
    pub public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct JanitorSettings {
    pub liveness_check_interval: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Parse CLI arguments and load settings in one step.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let cli = CliArgs::parse();
    let settings = load(&cli)?;
    Ok((cli, settings))
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("SCATTO").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Enqueue(args)) => raw.apply_database_override(&args.database),
        Some(Command::Stats(args)) => raw.apply_database_override(&args.database),
        Some(Command::Sweep(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    queue: RawQueueSettings,
    workers: RawWorkerSettings,
    render: RawRenderSettings,
    fallback: RawFallbackSettings,
    storage: RawStorageSettings,
    janitor: RawJanitorSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueueSettings {
    backoff_base_ms: Option<u64>,
    max_attempts: Option<u32>,
    stall_timeout_seconds: Option<u64>,
    poll_interval_ms: Option<u64>,
    completed_retention_seconds: Option<u64>,
    failed_retention_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    concurrency: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    browser_path: Option<PathBuf>,
    primary_max_attempts: Option<u32>,
    primary_retry_delay_ms: Option<u64>,
    timeout_seconds: Option<u64>,
    settle_ms: Option<u64>,
    viewport_width: Option<u32>,
    viewport_height: Option<u32>,
    viewport_scale: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFallbackSettings {
    endpoint: Option<String>,
    api_key: Option<String>,
    max_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    directory: Option<PathBuf>,
    public_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJanitorSettings {
    liveness_check_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(concurrency) = overrides.workers_concurrency {
            self.workers.concurrency = Some(concurrency);
        }
        if let Some(base) = overrides.queue_backoff_base_ms {
            self.queue.backoff_base_ms = Some(base);
        }
        if let Some(attempts) = overrides.queue_max_attempts {
            self.queue.max_attempts = Some(attempts);
        }
        if let Some(seconds) = overrides.queue_stall_timeout_seconds {
            self.queue.stall_timeout_seconds = Some(seconds);
        }
        if let Some(path) = overrides.render_browser_path.as_ref() {
            self.render.browser_path = Some(path.clone());
        }
        if let Some(endpoint) = overrides.fallback_endpoint.as_ref() {
            self.fallback.endpoint = Some(endpoint.clone());
        }
        if let Some(key) = overrides.fallback_api_key.as_ref() {
            self.fallback.api_key = Some(key.clone());
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(base_url) = overrides.storage_public_base_url.as_ref() {
            self.storage.public_base_url = Some(base_url.clone());
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            queue,
            workers,
            render,
            fallback,
            storage,
            janitor,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            queue: build_queue_settings(queue)?,
            workers: build_worker_settings(workers)?,
            render: build_render_settings(render)?,
            fallback: build_fallback_settings(fallback)?,
            storage: build_storage_settings(storage)?,
            janitor: build_janitor_settings(janitor)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database.max_connections.unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_queue_settings(queue: RawQueueSettings) -> Result<QueueSettings, LoadError> {
    let backoff_base_ms = queue
        .backoff_base_ms
        .unwrap_or(DEFAULT_QUEUE_BACKOFF_BASE_MS);
    if backoff_base_ms == 0 {
        return Err(LoadError::invalid(
            "queue.backoff_base_ms",
            "must be greater than zero",
        ));
    }

    let max_attempts = non_zero_u32(
        queue.max_attempts.unwrap_or(DEFAULT_QUEUE_MAX_ATTEMPTS),
        "queue.max_attempts",
    )?;

    let stall_timeout_seconds = queue
        .stall_timeout_seconds
        .unwrap_or(DEFAULT_QUEUE_STALL_TIMEOUT_SECS);
    if stall_timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "queue.stall_timeout_seconds",
            "must be greater than zero",
        ));
    }

    let poll_interval_ms = queue
        .poll_interval_ms
        .unwrap_or(DEFAULT_QUEUE_POLL_INTERVAL_MS);
    if poll_interval_ms == 0 {
        return Err(LoadError::invalid(
            "queue.poll_interval_ms",
            "must be greater than zero",
        ));
    }

    Ok(QueueSettings {
        backoff_base: Duration::from_millis(backoff_base_ms),
        max_attempts,
        stall_timeout: Duration::from_secs(stall_timeout_seconds),
        poll_interval: Duration::from_millis(poll_interval_ms),
        completed_retention: Duration::from_secs(
            queue
                .completed_retention_seconds
                .unwrap_or(DEFAULT_COMPLETED_RETENTION_SECS),
        ),
        failed_retention: Duration::from_secs(
            queue
                .failed_retention_seconds
                .unwrap_or(DEFAULT_FAILED_RETENTION_SECS),
        ),
    })
}

fn build_worker_settings(workers: RawWorkerSettings) -> Result<WorkerSettings, LoadError> {
    Ok(WorkerSettings {
        concurrency: non_zero_u32(
            workers.concurrency.unwrap_or(DEFAULT_WORKER_CONCURRENCY),
            "workers.concurrency",
        )?,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let browser_path = render
        .browser_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BROWSER_PATH));
    if browser_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.browser_path",
            "path must not be empty",
        ));
    }

    let viewport = Viewport {
        width: render.viewport_width.unwrap_or(DEFAULT_VIEWPORT.width),
        height: render.viewport_height.unwrap_or(DEFAULT_VIEWPORT.height),
        scale: render.viewport_scale.unwrap_or(DEFAULT_VIEWPORT.scale),
    };
    if viewport.width == 0 || viewport.height == 0 || viewport.scale == 0 {
        return Err(LoadError::invalid(
            "render.viewport",
            "width, height, and scale must be greater than zero",
        ));
    }

    Ok(RenderSettings {
        browser_path,
        primary_max_attempts: non_zero_u32(
            render
                .primary_max_attempts
                .unwrap_or(DEFAULT_PRIMARY_MAX_ATTEMPTS),
            "render.primary_max_attempts",
        )?,
        primary_retry_delay: Duration::from_millis(
            render
                .primary_retry_delay_ms
                .unwrap_or(DEFAULT_PRIMARY_RETRY_DELAY_MS),
        ),
        hard_timeout: Duration::from_secs(
            render.timeout_seconds.unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS),
        ),
        settle_delay: render
            .settle_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_SETTLE_DELAY),
        viewport,
    })
}

fn build_fallback_settings(fallback: RawFallbackSettings) -> Result<FallbackSettings, LoadError> {
    let endpoint = match fallback.endpoint {
        Some(raw) if !raw.trim().is_empty() => Some(Url::parse(raw.trim()).map_err(|err| {
            LoadError::invalid("fallback.endpoint", format!("failed to parse: {err}"))
        })?),
        _ => None,
    };

    let api_key = fallback.api_key.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    Ok(FallbackSettings {
        endpoint,
        api_key,
        max_attempts: non_zero_u32(
            fallback
                .max_attempts
                .unwrap_or(DEFAULT_FALLBACK_MAX_ATTEMPTS),
            "fallback.max_attempts",
        )?,
        retry_delay: Duration::from_millis(
            fallback
                .retry_delay_ms
                .unwrap_or(DEFAULT_FALLBACK_RETRY_DELAY_MS),
        ),
        request_timeout: Duration::from_secs(
            fallback
                .timeout_seconds
                .unwrap_or(DEFAULT_FALLBACK_TIMEOUT_SECS),
        ),
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let directory = storage
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.directory",
            "path must not be empty",
        ));
    }

    let public_base_url = storage
        .public_base_url
        .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string());
    if public_base_url.trim().is_empty() {
        return Err(LoadError::invalid(
            "storage.public_base_url",
            "must not be empty",
        ));
    }

    Ok(StorageSettings {
        directory,
        public_base_url,
    })
}

fn build_janitor_settings(janitor: RawJanitorSettings) -> Result<JanitorSettings, LoadError> {
    let liveness_check_seconds = janitor
        .liveness_check_seconds
        .unwrap_or(DEFAULT_LIVENESS_CHECK_SECS);
    if liveness_check_seconds == 0 {
        return Err(LoadError::invalid(
            "janitor.liveness_check_seconds",
            "must be greater than zero",
        ));
    }

    let sweep_interval_seconds = janitor
        .sweep_interval_seconds
        .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    if sweep_interval_seconds == 0 {
        return Err(LoadError::invalid(
            "janitor.sweep_interval_seconds",
            "must be greater than zero",
        ));
    }

    Ok(JanitorSettings {
        liveness_check_interval: Duration::from_secs(liveness_check_seconds),
        sweep_interval: Duration::from_secs(sweep_interval_seconds),
    })
}

fn non_zero_u32(value: u32, key: &'static str) -> Result<NonZeroU32, LoadError> {
    NonZeroU32::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
