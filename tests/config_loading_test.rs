//! Configuration files on disk

use std::io::Write;
use std::time::Duration;

use subnet_registrar::config::{Config, HttpMethod, RunMode, SourceKind};
use subnet_registrar::errors::ConfigError;

#[test]
fn test_example_config_is_valid() {
    let config = Config::from_toml_str(include_str!("../config.example.toml")).unwrap();
    config.validate().unwrap();

    assert_eq!(config.sources.len(), 3);
    assert_eq!(config.sources[0].kind, SourceKind::SubstrateRpc);
    assert_eq!(config.sources[2].method, HttpMethod::Post);
    assert_eq!(config.effective_quorum(), 2);
    assert_eq!(config.chain.mode, RunMode::Simulation);
    assert!(!config.notifications.telegram_enabled());
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
network = "test"
subnet_id = 27
thread_count = 2
min_delay_ms = 1000
max_delay_ms = 2000
max_retries = 3
quorum = 1
wallets = [{{ id = "cold/a", label = "alpha" }}, {{ id = "cold/b" }}]

[window_sub_range]
start = 350
end = 20

[[sources]]
name = "node"
url = "http://127.0.0.1:9944"
kind = "substrate_rpc"
timeout_ms = 2500

[[sources]]
name = "explorer"
url = "http://127.0.0.1:8080/height"
kind = "http_json"
height_pointer = "/height"

[fee]
step_up = 2.0

[chain]
mode = "production"
relay_url = "http://127.0.0.1:8787"
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    config.validate().unwrap();

    assert_eq!(config.network, "test");
    assert_eq!(config.subnet_id, 27);
    assert_eq!(config.wallets.len(), 2);
    assert_eq!(config.wallets[0].label.as_deref(), Some("alpha"));
    assert_eq!(config.effective_quorum(), 1);
    assert_eq!(config.sources[0].timeout(config.source_timeout_ms), Duration::from_millis(2500));
    assert_eq!(config.sources[1].timeout(config.source_timeout_ms), Duration::from_millis(10_000));
    assert_eq!(config.fee.step_up, 2.0);
    assert_eq!(config.fee.step_down, 0.9);
    assert_eq!(config.chain.mode, RunMode::Production);

    // Wrapping sub-range
    let schedule = config.window_schedule().unwrap();
    assert!(schedule.contains(355));
    assert!(schedule.contains(5));
    assert!(!schedule.contains(100));

    let settings = config.executor_settings();
    assert_eq!(settings.max_retries, 3);
    assert_eq!(settings.backoff.min_delay, Duration::from_millis(1000));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "{:?}", err);
}

#[test]
fn test_malformed_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "thread_count = \"many\"").unwrap();
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)), "{:?}", err);
}

#[test]
fn test_priority_fee_switch_reaches_fee_config() {
    let mut config = Config::from_toml_str("enable_priority_fee = false").unwrap();
    assert!(!config.fee_config().enable_priority_fee);

    config
        .apply_overrides_from(|var| (var == "REGISTRAR_ENABLE_PRIORITY_FEE").then(|| "true".to_string()))
        .unwrap();
    assert!(config.fee_config().enable_priority_fee);
}

#[test]
fn test_load_defers_validation() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[chain]
mode = "production"
"#
    )
    .unwrap();

    // Missing relay_url only matters once the mode is final
    let mut config = Config::load(file.path()).unwrap();
    assert!(config.validate().is_err());

    config.chain.mode = RunMode::Simulation;
    config.validate().unwrap();
}
