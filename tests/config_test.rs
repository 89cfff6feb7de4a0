//! Configuration file loading tests

use rampart::resilience::ErrorCategory;
use rampart::{LogLevel, RampartConfig, RampartError};
use std::io::Write;
use std::time::Duration;
use tempfile::{Builder, NamedTempFile};

fn write_config(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_toml() {
    let file = write_config(
        ".toml",
        r#"
            circuit_breaker_duration = 10
            api_retry_delay = 2
            base_delay = 0.25
            log_level = "debug"
            snapshot_interval = 300

            [circuit_breaker]
            api_error = 3
            model = 8
        "#,
    );

    let config = RampartConfig::from_file(file.path()).unwrap();
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.snapshot_schedule(), Some(Duration::from_secs(300)));

    let resilience = config.resilience_config();
    assert_eq!(resilience.breaker.threshold(ErrorCategory::Api), 3);
    assert_eq!(resilience.breaker.threshold(ErrorCategory::Model), 8);
    assert_eq!(resilience.breaker.threshold(ErrorCategory::Data), 5);
    assert_eq!(resilience.breaker.cool_down, Duration::from_secs(600));
    assert_eq!(resilience.recovery.api_retry_delay, Duration::from_secs(2));
    assert_eq!(resilience.retry.delay_for_attempt(3), Duration::from_secs(1));
}

#[test]
fn test_load_json() {
    let file = write_config(
        ".json",
        r#"{ "circuit_breaker": { "network": 2 }, "max_retries": 6 }"#,
    );

    let config = RampartConfig::from_file(file.path()).unwrap();
    assert_eq!(config.max_retries, 6);
    assert_eq!(config.thresholds()[&ErrorCategory::Network], 2);
}

#[test]
fn test_invalid_files_are_config_errors() {
    let unknown = write_config(".toml", "[circuit_breaker]\nweather = 3\n");
    assert!(matches!(
        RampartConfig::from_file(unknown.path()),
        Err(RampartError::Config(_))
    ));

    let malformed = write_config(".toml", "circuit_breaker_duration = \"soon\"\n");
    assert!(matches!(
        RampartConfig::from_file(malformed.path()),
        Err(RampartError::Config(_))
    ));
}

#[test]
fn test_toml_save_and_reload() {
    let mut config = RampartConfig {
        trading_halt_wait: 120,
        ..Default::default()
    };
    config.circuit_breaker.insert("trading".to_string(), 2);

    let file = Builder::new().suffix(".toml").tempfile().unwrap();
    config.to_file(file.path()).unwrap();

    assert_eq!(RampartConfig::from_file(file.path()).unwrap(), config);
}
