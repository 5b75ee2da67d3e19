//! Logging initialization
//!
//! Runs in its own test binary: the global subscriber can only be installed
//! once per process.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use protocol_probe::config::LoggingConfig;
use protocol_probe::utils::logging::init_logging;
use protocol_probe::ErrorKind;

#[test]
fn test_invalid_config_is_refused() {
    let config = LoggingConfig {
        log_to_console: false,
        log_to_file: false,
        ..LoggingConfig::default()
    };

    let err = init_logging(&config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectError);
    assert!(err.to_string().contains("At least one logging output"));
}

#[test]
fn test_json_file_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session.log");
    let config = LoggingConfig {
        log_to_console: false,
        log_to_file: true,
        log_file_path: Some(path.to_string_lossy().into_owned()),
        json_format: true,
        ..LoggingConfig::default()
    };

    init_logging(&config).expect("first init");
    // a second call keeps the first subscriber
    init_logging(&config).expect("second init");

    tracing::error!("logging-file-marker");

    let contents = std::fs::read_to_string(&path).expect("log file");
    let event = contents
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find(|v| v["fields"]["message"] == "logging-file-marker")
        .expect("marker event in log file");
    assert_eq!(event["level"], "ERROR");
}
