use pulse::PulseError;
use pulse::logging::{self, LoggingConfig};
use serial_test::serial;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
#[serial]
fn file_logging_then_second_init_fails() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempdir()?;
    let log_dir = tmp_dir.path().join("logs");
    let config =
        LoggingConfig { path: Some(log_dir.clone()), console: false, ..LoggingConfig::default() };

    let guard = logging::init("pulse-file-logging", &config)?;
    assert!(guard.has_file_output());
    tracing::info!(subscriber = "sub_test", "hello from the logging test");

    let err = logging::init("pulse-second", &LoggingConfig::default()).unwrap_err();
    assert!(matches!(err, PulseError::Logging { .. }), "expected a logging error, got {err}");

    std::thread::sleep(Duration::from_millis(30));
    drop(guard);

    let log_file = fs::read_dir(&log_dir)?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| path.extension().and_then(|ext| ext.to_str()) == Some("log"))
        .expect("log file should be created");
    assert!(fs::metadata(&log_file)?.len() > 0, "log file should not be empty");
    Ok(())
}
