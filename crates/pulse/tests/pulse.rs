use pulse::events::{Event, EventType, HandlerResult, KeyInput, Payload, Topic};
use pulse::{Pulse, PulseConfig, PulseError, RuleSettings, load_config};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn key(k: &str) -> Event {
    Event::key_input(KeyInput::new(k))
}

#[test]
fn load_config_reads_toml_over_defaults() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    writeln!(
        file,
        r#"
[bus]
queue_capacity = 16

[filter.rules.key_input]
max_per_second = 20
min_interval_ms = 10

[batcher]
enabled = true
batch_size = 5
"#
    )?;

    let config: PulseConfig = load_config(file.path())?;
    assert_eq!(config.bus.queue_capacity, 16);
    assert_eq!(config.bus.stop_timeout_ms, 5_000);
    assert_eq!(
        config.filter.rules.get("key_input"),
        Some(&RuleSettings { min_interval_ms: Some(10), max_per_second: Some(20) })
    );
    assert!(config.batcher.enabled);
    assert_eq!(config.batcher.batch_size, 5);
    assert_eq!(config.batcher.timeout_ms, 100);
    assert!(config.logging.console);
    Ok(())
}

#[test]
fn load_config_requires_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_config::<PulseConfig>(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, PulseError::Config { .. }));
}

#[tokio::test]
async fn configured_rules_gate_the_bus() {
    let mut config = PulseConfig::default();
    config.filter.rules.insert(
        "key_input".to_owned(),
        RuleSettings { max_per_second: Some(1), ..Default::default() },
    );
    let pulse = Pulse::start(&config).unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    pulse
        .bus()
        .subscribe(Topic::All, move |_event: Arc<Event>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                HandlerResult::Ok(())
            }
        })
        .unwrap();

    for k in ["a", "b", "c"] {
        pulse.publish(key(k)).unwrap();
    }
    pulse.publish(Event::new(EventType::Clipboard, Payload::empty())).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while calls.load(Ordering::SeqCst) < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    pulse.shutdown().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(pulse.bus().stats().filtered, 2);
    assert!(pulse.filter().has_rules());
}

#[tokio::test]
async fn shutdown_flushes_the_batcher() {
    let mut config = PulseConfig::default();
    config.batcher.enabled = true;
    config.batcher.batch_size = 100;
    config.batcher.timeout_ms = 60_000;
    let pulse = Pulse::start(&config).unwrap();
    let mut output = pulse.batcher().unwrap().output().unwrap();

    for k in ["a", "b", "c"] {
        pulse.publish(key(k)).unwrap();
    }
    let batcher = pulse.batcher().unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while batcher.stats().accepted < 3 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    pulse.shutdown().await.unwrap();
    let batch = output.recv().await.unwrap();
    assert_eq!(batch.len(), 3);
    assert!(output.recv().await.is_none());
    assert!(matches!(pulse.publish(key("late")), Err(PulseError::Bus { .. })));
}

#[tokio::test]
async fn invalid_configuration_is_refused() {
    let mut config = PulseConfig::default();
    config.bus.queue_capacity = 0;
    assert!(matches!(Pulse::start(&config), Err(PulseError::InvalidConfiguration { .. })));
}
