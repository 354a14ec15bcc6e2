//! Integration tests for layered loading and pipeline assembly.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use relay_config::{CacheValidators, ConfigError, ConfigLoader, RelayConfig};
use relay_core::{Pipeline, RelayError, RequestContext, TimeoutPhase};
use relay_telemetry::LogFormat;
use relay_test::{MockResponse, MockTransport};
use tempfile::Builder;

fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_toml_file() {
    let file = write_temp(
        ".toml",
        r#"
            [timeouts]
            request_ms = 1000
            total_ms = 5000

            [retry]
            tries = 4

            [retry.backoff]
            initial_ms = 50
            max_ms = 400

            [cache]
            enabled = true
            validators = "last_modified"
            capacity = 64

            [logging]
            level = "warn"
            format = "compact"
        "#,
    );

    let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();

    assert_eq!(config.timeouts.request_ms, Some(1000));
    assert_eq!(config.timeout_config().total, Some(Duration::from_secs(5)));
    assert_eq!(config.retry.tries, 4);
    assert_eq!(config.retry.backoff.initial_ms, 50);
    assert_eq!(config.cache.validators, CacheValidators::LastModified);
    assert_eq!(config.cache.capacity, Some(64));
    assert_eq!(config.log_config().format, LogFormat::Compact);
}

#[test]
fn test_json_file() {
    let file = write_temp(".json", r#"{"transport": {"base_url": "http://localhost:8080"}}"#);
    let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
    assert_eq!(config.transport.base_url.as_deref(), Some("http://localhost:8080"));
}

#[test]
fn test_unknown_field_in_file_rejected() {
    let file = write_temp(".toml", "[cache]\nenabled = true\nsize = 10\n");
    let result = ConfigLoader::new().with_file(file.path());
    assert!(matches!(result, Err(ConfigError::TomlError(_))));
}

#[test]
fn test_unsupported_extension_rejected() {
    let file = write_temp(".yaml", "retry: {}\n");
    let result = ConfigLoader::new().with_file(file.path());
    assert!(matches!(result, Err(ConfigError::ValidationError(_))));
}

#[test]
fn test_env_overrides_file() {
    let file = write_temp(".toml", "[retry]\ntries = 4\n");
    std::env::set_var("RELAYLOADTEST__RETRY__TRIES", "6");
    std::env::set_var("RELAYLOADTEST__TIMEOUTS__BODY_MS", "250");

    let config = ConfigLoader::new()
        .with_file(file.path())
        .unwrap()
        .with_env_prefix("relayloadtest")
        .load()
        .unwrap();

    assert_eq!(config.retry.tries, 6);
    assert_eq!(config.timeouts.body_ms, Some(250));
}

#[test]
fn test_invalid_env_override_fails_load() {
    std::env::set_var("RELAYBADTEST__CACHE__TTL_MS", "soon");
    let result = ConfigLoader::new().with_env_prefix("RELAYBADTEST").load();
    assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));
}

#[tokio::test]
async fn test_configured_pipeline_retries() {
    let config = ConfigLoader::new()
        .with_string(
            r#"
                [retry]
                tries = 3

                [retry.backoff]
                initial_ms = 1
                max_ms = 1
            "#,
            "toml",
        )
        .unwrap()
        .load()
        .unwrap();

    let mock = Arc::new(
        MockTransport::new()
            .reply(MockResponse::status(503))
            .reply(RelayError::network("reset"))
            .reply(MockResponse::ok().text("done")),
    );
    let pipeline: Pipeline = config
        .pipeline_builder()
        .unwrap()
        .transport(Arc::clone(&mock))
        .build()
        .unwrap();

    let res = pipeline.execute(RequestContext::new("/items").unwrap()).await.unwrap();
    assert!(res.ok());
    assert_eq!(mock.call_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_configured_pipeline_times_out() {
    let mut config = RelayConfig::default();
    config.retry.enabled = false;
    config.timeouts.request_ms = Some(50);

    let mock = Arc::new(
        MockTransport::new().reply(MockResponse::ok().delay(Duration::from_secs(5))),
    );
    let pipeline = config
        .pipeline_builder()
        .unwrap()
        .transport(Arc::clone(&mock))
        .build()
        .unwrap();

    let err = pipeline
        .execute(RequestContext::new("/slow").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RelayError::Timeout {
            phase: TimeoutPhase::Request,
            timeout_ms: 50
        }
    ));
}

#[tokio::test]
async fn test_configured_cache_serves_hits() {
    let mut config = RelayConfig::default();
    config.retry.enabled = false;
    config.cache.enabled = true;

    let mock = Arc::new(
        MockTransport::new().reply(MockResponse::ok().header("etag", "\"v1\"").text("cached")),
    );
    let pipeline = config
        .pipeline_builder()
        .unwrap()
        .transport(Arc::clone(&mock))
        .build()
        .unwrap();

    pipeline.execute(RequestContext::new("/doc").unwrap()).await.unwrap();
    let hit = pipeline.execute(RequestContext::new("/doc").unwrap()).await.unwrap();

    assert_eq!(hit.header_str("x-cache"), Some("HIT"));
    assert_eq!(mock.call_count(), 1);
}

#[test]
fn test_build_pipeline_with_http_transport() {
    let mut config = RelayConfig::production();
    config.transport.base_url = Some("https://api.example.com".to_string());
    let pipeline = config.build_pipeline().unwrap();
    assert_eq!(pipeline.stage_count(), 3);
}
