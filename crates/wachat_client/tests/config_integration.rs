//! Integration tests for config load/save and defaults.

use std::time::Duration;

use predicates::prelude::*;
use wachat_client::{config, Config, ConfigError, SyncOptions};

#[test]
fn load_existing_yaml_config() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    std::fs::write(
        &config_path,
        r#"
server:
  url: "ws://10.0.0.2:9000"
chat:
  request_timeout_secs: 10
  stream_timeout_secs: 120
  title_prefix: "新对话"
log:
  level: debug
"#,
    )
    .unwrap();

    let cfg = config::load(&config_path).expect("load should succeed");
    assert_eq!(cfg.server_url(), "ws://10.0.0.2:9000");
    assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
    assert_eq!(cfg.stream_timeout(), Duration::from_secs(120));
    assert_eq!(cfg.title_prefix(), "新对话");
    assert_eq!(cfg.log_level(), "debug");

    let options = SyncOptions::from(&cfg);
    assert_eq!(options.stream_timeout, Duration::from_secs(120));
    assert_eq!(options.title_prefix, "新对话");
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    std::fs::write(&config_path, "server:\n  url: ws://localhost:1234\n").unwrap();

    let cfg = config::load(&config_path).expect("load should succeed");
    assert_eq!(cfg.server_url(), "ws://localhost:1234");
    assert_eq!(
        cfg.request_timeout(),
        Duration::from_secs(config::DEFAULT_REQUEST_TIMEOUT_SECS)
    );
    assert_eq!(
        cfg.stream_timeout(),
        Duration::from_secs(config::DEFAULT_STREAM_TIMEOUT_SECS)
    );
    assert_eq!(cfg.title_prefix(), config::DEFAULT_TITLE_PREFIX);
    assert_eq!(Config::default().server_url(), config::DEFAULT_SERVER_URL);
}

#[test]
fn save_creates_directory_and_file_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("wachat");
    let config_path = config_dir.join("config.yaml");
    assert!(!config_dir.exists(), "config dir should not exist yet");

    let mut config = Config::default();
    config.server.url = Some("ws://127.0.0.1:8766".into());
    config.chat.stream_timeout_secs = Some(60);

    config::save(&config_path, &config).expect("save should succeed");
    let pred = predicates::path::exists();
    assert!(
        pred.eval(&config_path),
        "config file should exist after save"
    );
    assert!(config_dir.exists(), "config directory should be created");
}

#[test]
fn round_trip_preserves_schema() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    let yaml = r#"
server:
  url: "ws://127.0.0.1:8765"
chat:
  request_timeout_secs: 15
  title_prefix: "Chat"
"#;
    std::fs::write(&config_path, yaml).unwrap();

    let loaded = config::load(&config_path).expect("load should succeed");
    config::save(&config_path, &loaded).expect("save should succeed");

    let contents = std::fs::read_to_string(&config_path).unwrap();
    let pred = predicates::str::contains("server:");
    assert!(pred.eval(&contents), "saved file should contain server section");
    let pred = predicates::str::contains("request_timeout_secs");
    assert!(pred.eval(&contents), "saved file should contain request timeout");
    let pred = predicates::str::contains("stream_timeout_secs");
    assert!(
        !pred.eval(&contents),
        "unset fields should not be written"
    );

    let reloaded = config::load(&config_path).expect("reload should succeed");
    assert_eq!(reloaded.server.url, loaded.server.url);
    assert_eq!(
        reloaded.chat.request_timeout_secs,
        loaded.chat.request_timeout_secs
    );
    assert_eq!(reloaded.chat.title_prefix, loaded.chat.title_prefix);
}

#[test]
fn load_reports_missing_file_and_bad_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.yaml");
    assert!(matches!(
        config::load(&missing),
        Err(ConfigError::Io { .. })
    ));

    let broken = dir.path().join("broken.yaml");
    std::fs::write(&broken, "chat:\n  stream_timeout_secs: soon\n").unwrap();
    let err = config::load(&broken).unwrap_err();
    assert!(matches!(err, ConfigError::Yaml(_)));
    assert!(err.to_string().contains("invalid config"));
}

/// Config path resolves to `~/.wachat/config.yaml` using the current platform's home dir.
/// We override the HOME env var to a temp dir to verify the resolution.
#[test]
fn default_config_path_uses_home_directory() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().to_str().unwrap().to_string();

    // Override HOME (Unix) / USERPROFILE (Windows) temporarily.
    let key = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    let original = std::env::var(key).ok();

    std::env::set_var(key, &home);
    let path = config::default_config_path();
    // Restore.
    match original {
        Some(v) => std::env::set_var(key, v),
        None => std::env::remove_var(key),
    }

    let path = path.expect("should resolve a config path");
    let expected = dir.path().join(".wachat").join("config.yaml");
    assert_eq!(path, expected);
}
