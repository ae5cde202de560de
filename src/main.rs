use std::{process, sync::Arc, time::Duration};

use scatto::{
    application::{
        error::AppError,
        persist::ResultPersister,
        queue::{QueuePolicy, ScreenshotQueue},
        render::{RenderOrchestrator, RenderPolicy, Renderer},
        repos::{JobStore, ListingsRepo, TemplatesRepo, UserPagesRepo},
        service::{ScreenshotService, ScreenshotServiceConfig},
    },
    config,
    domain::{
        jobs::{EnqueueOptions, HtmlSource},
        types::{RenderTarget, TargetKind},
    },
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        renderer::{ChromiumRenderer, DisabledRenderer, RemoteRenderer},
        storage::PreviewStorage,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Enqueue(args) => run_enqueue(settings, args).await,
        config::Command::Stats(_) => run_stats(settings).await,
        config::Command::Sweep(_) => run_sweep(settings).await,
    }
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<Arc<PostgresRepositories>, AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let pool =
        PostgresRepositories::connect(database_url, settings.database.max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok(Arc::new(PostgresRepositories::new(pool)))
}

fn build_queue(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Arc<ScreenshotQueue> {
    let store: Arc<dyn JobStore> = repositories;
    let policy = QueuePolicy {
        backoff_base: settings.queue.backoff_base,
        default_max_attempts: settings.queue.max_attempts.get() as i32,
        stall_timeout: settings.queue.stall_timeout,
        completed_retention: settings.queue.completed_retention,
        failed_retention: settings.queue.failed_retention,
    };
    Arc::new(ScreenshotQueue::new(store, policy))
}

fn build_service(
    repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<ScreenshotService, AppError> {
    let queue = build_queue(repositories.clone(), settings);

    let primary: Arc<dyn Renderer> = Arc::new(ChromiumRenderer::new(
        settings.render.browser_path.clone(),
        settings.render.viewport,
        settings.render.settle_delay,
        settings.render.hard_timeout,
    ));

    let fallback: Arc<dyn Renderer> = match (&settings.fallback.endpoint, &settings.fallback.api_key)
    {
        (Some(endpoint), Some(api_key)) => Arc::new(RemoteRenderer::new(
            endpoint.clone(),
            api_key.clone(),
            settings.render.viewport,
            settings.render.settle_delay,
            settings.fallback.request_timeout,
        )?),
        _ => {
            info!(
                target = "scatto::serve",
                "Fallback rendering API not configured; running primary-only"
            );
            Arc::new(DisabledRenderer::new(
                "fallback rendering API not configured",
            ))
        }
    };

    let render_policy = RenderPolicy {
        primary_max_attempts: settings.render.primary_max_attempts.get(),
        primary_retry_delay: settings.render.primary_retry_delay,
        fallback_max_attempts: settings.fallback.max_attempts.get(),
        fallback_retry_delay: settings.fallback.retry_delay,
    };
    let orchestrator = Arc::new(RenderOrchestrator::new(primary, fallback, render_policy));

    let storage = Arc::new(
        PreviewStorage::new(
            settings.storage.directory.clone(),
            settings.storage.public_base_url.clone(),
        )
        .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );

    let listings: Arc<dyn ListingsRepo> = repositories.clone();
    let user_pages: Arc<dyn UserPagesRepo> = repositories.clone();
    let templates: Arc<dyn TemplatesRepo> = repositories;
    let persister = Arc::new(ResultPersister::new(listings, user_pages, templates));

    let service_config = ScreenshotServiceConfig {
        worker_concurrency: settings.workers.concurrency.get() as usize,
        poll_interval: settings.queue.poll_interval,
        liveness_check_interval: settings.janitor.liveness_check_interval,
        sweep_interval: settings.janitor.sweep_interval,
    };

    Ok(ScreenshotService::new(
        queue,
        orchestrator,
        storage,
        persister,
        service_config,
    ))
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let mut service = build_service(repositories, &settings)?;

    service.start();

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| AppError::unexpected(format!("failed to listen for shutdown: {err}")))?;

    info!(
        target = "scatto::serve",
        "Shutdown signal received; draining in-flight jobs"
    );
    service.drain().await;
    Ok(())
}

async fn run_enqueue(
    settings: config::Settings,
    args: config::EnqueueArgs,
) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let queue = build_queue(repositories, &settings);

    let source = match (args.html_file, args.stored_key) {
        (Some(path), None) => {
            let html = tokio::fs::read_to_string(&path)
                .await
                .map_err(|err| AppError::from(InfraError::Io(err)))?;
            HtmlSource::Inline { html }
        }
        (None, Some(key)) => HtmlSource::Stored { key },
        _ => {
            return Err(AppError::validation(
                "enqueue requires exactly one of --html-file or --stored-key",
            ));
        }
    };

    let target = match (args.target_kind, args.target_id) {
        (Some(kind), Some(id)) => {
            let kind = TargetKind::try_from(kind.as_str())
                .map_err(|()| AppError::validation(format!("unknown target kind `{kind}`")))?;
            Some(RenderTarget { kind, id })
        }
        (None, None) => None,
        _ => {
            return Err(AppError::validation(
                "target kind and id must be supplied together",
            ));
        }
    };

    let options = EnqueueOptions {
        priority: args.priority,
        delay: args.delay_seconds.map(Duration::from_secs),
        max_attempts: args.max_attempts,
    };

    let job_id = queue.enqueue(source, target, options).await?;
    println!("{job_id}");
    Ok(())
}

async fn run_stats(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let queue = build_queue(repositories, &settings);

    let counts = queue.stats().await?;
    let report = serde_json::json!({
        "waiting": counts.waiting,
        "active": counts.active,
        "completed": counts.completed,
        "failed": counts.failed,
        "delayed": counts.delayed,
        "total": counts.total(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&report)
            .map_err(|err| AppError::unexpected(err.to_string()))?
    );
    Ok(())
}

async fn run_sweep(settings: config::Settings) -> Result<(), AppError> {
    let repositories = init_repositories(&settings).await?;
    let queue = build_queue(repositories, &settings);

    let removed = queue.sweep().await?;
    println!("{removed}");
    Ok(())
}
