use clap::Parser;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.workers.concurrency = Some(2);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        workers_concurrency: Some(6),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.workers.concurrency.get(), 6);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn queue_defaults_match_the_documented_policy() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.queue.backoff_base, Duration::from_millis(2_000));
    assert_eq!(settings.queue.max_attempts.get(), 3);
    assert_eq!(settings.queue.stall_timeout, Duration::from_secs(120));
    assert_eq!(
        settings.queue.completed_retention,
        Duration::from_secs(60 * 60)
    );
    assert_eq!(
        settings.queue.failed_retention,
        Duration::from_secs(24 * 60 * 60)
    );
}

#[test]
fn render_defaults_match_the_capture_contract() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.render.viewport.width, 1280);
    assert_eq!(settings.render.viewport.height, 1024);
    assert_eq!(settings.render.viewport.scale, 1);
    assert_eq!(settings.render.settle_delay, Duration::from_secs(3));
    assert_eq!(settings.render.primary_max_attempts.get(), 3);
    assert_eq!(settings.fallback.max_attempts.get(), 2);
}

#[test]
fn zero_concurrency_is_rejected() {
    let mut raw = RawSettings::default();
    raw.workers.concurrency = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero concurrency");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "workers.concurrency",
            ..
        }
    ));
}

#[test]
fn invalid_fallback_endpoint_is_rejected() {
    let mut raw = RawSettings::default();
    raw.fallback.endpoint = Some("not a url".to_string());

    let err = Settings::from_raw(raw).expect_err("bad endpoint");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "fallback.endpoint",
            ..
        }
    ));
}

#[test]
fn fallback_requires_endpoint_and_key_to_be_configured() {
    let mut raw = RawSettings::default();
    raw.fallback.endpoint = Some("https://render.example/v1/render".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(!settings.fallback.is_configured());

    let mut raw = RawSettings::default();
    raw.fallback.endpoint = Some("https://render.example/v1/render".to_string());
    raw.fallback.api_key = Some("key".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.fallback.is_configured());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["scatto"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_enqueue_arguments() {
    let args = CliArgs::parse_from([
        "scatto",
        "enqueue",
        "--database-url",
        "postgres://example",
        "--stored-key",
        "2026/08/07/doc.html",
        "--target-kind",
        "page_listing",
        "--target-id",
        "0193a1c8-9f3e-7c1a-b3d2-3a5f0e6c9d11",
        "--priority",
        "5",
    ]);

    match args.command.expect("enqueue command") {
        Command::Enqueue(enqueue) => {
            assert_eq!(
                enqueue.database.database_url.as_deref(),
                Some("postgres://example")
            );
            assert_eq!(enqueue.stored_key.as_deref(), Some("2026/08/07/doc.html"));
            assert_eq!(enqueue.target_kind.as_deref(), Some("page_listing"));
            assert_eq!(enqueue.priority, 5);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}
