use std::time::{Duration, Instant};

use guardian_ingest::ingest::{OpenStep, ScriptedConnector, Step};
use guardian_ingest::{ConnectionState, IngestError, Ingestion, SourceConfig, SourceId};

fn fast_config() -> SourceConfig {
    SourceConfig {
        width: 64,
        height: 48,
        target_fps: 200,
        read_timeout: Duration::from_millis(20),
        stale_threshold: Duration::from_millis(500),
        reconnect_delay: Duration::from_millis(10),
        max_reconnect_attempts: 5,
        shutdown_timeout: Duration::from_secs(2),
        ..SourceConfig::default()
    }
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn repeated_loss_ends_in_failed_state() -> anyhow::Result<()> {
    let connector = ScriptedConnector::new().then_reads(Step::Lost);
    let probe = connector.probe();
    let mut ingestion = Ingestion::new(fast_config()).with_connector(Box::new(connector));
    ingestion.start()?;

    assert!(wait_for(Duration::from_secs(5), || {
        ingestion.health().state == ConnectionState::Failed
    }));
    let health = ingestion.health();
    assert!(!health.healthy);
    assert_eq!(health.reconnect_count, 0);
    assert_eq!(health.reconnect_attempts, 5);
    assert_eq!(probe.reads(), 5);
    assert!(wait_for(Duration::from_secs(1), || probe.live_handles() == 0));

    ingestion.stop();
    Ok(())
}

#[test]
fn transient_error_keeps_stream_open() -> anyhow::Result<()> {
    let connector = ScriptedConnector::new().with_reads([Step::Frame, Step::Corrupt]);
    let mut ingestion = Ingestion::new(fast_config()).with_connector(Box::new(connector));
    ingestion.start()?;

    assert!(wait_for(Duration::from_secs(2), || {
        ingestion.health().frames_captured >= 5
    }));
    let health = ingestion.health();
    assert_eq!(health.state, ConnectionState::Open);
    assert!(health.healthy);
    assert_eq!(health.failed_reads, 1);
    assert_eq!(health.reconnect_count, 0);

    ingestion.stop();
    Ok(())
}

#[test]
fn recovers_from_a_dropped_connection() -> anyhow::Result<()> {
    let connector = ScriptedConnector::new().with_reads([Step::Frame, Step::Frame, Step::Lost]);
    let probe = connector.probe();
    let mut ingestion = Ingestion::new(fast_config()).with_connector(Box::new(connector));
    ingestion.start()?;

    assert!(wait_for(Duration::from_secs(2), || {
        ingestion.health().reconnect_count == 1
    }));
    let health = ingestion.health();
    assert_eq!(health.state, ConnectionState::Open);
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(probe.open_calls(), 2);

    ingestion.stop();
    Ok(())
}

#[test]
fn latest_frame_sequence_increases() -> anyhow::Result<()> {
    let mut ingestion =
        Ingestion::new(fast_config()).with_connector(Box::new(ScriptedConnector::new()));
    ingestion.start()?;

    assert!(wait_for(Duration::from_secs(2), || ingestion
        .latest_frame()
        .is_some()));
    let first = ingestion.latest_frame().expect("frame");
    assert!(wait_for(Duration::from_secs(2), || {
        ingestion
            .latest_frame()
            .is_some_and(|frame| frame.sequence > first.sequence)
    }));
    let next = ingestion.latest_frame().expect("frame");
    assert_eq!((next.width, next.height), (64, 48));
    assert!(ingestion.is_streaming());
    assert!(wait_for(Duration::from_secs(2), || ingestion
        .measured_fps()
        .is_some()));

    ingestion.stop();
    Ok(())
}

#[test]
fn stop_twice_closes_handle_and_clears_slot() -> anyhow::Result<()> {
    let connector = ScriptedConnector::new();
    let probe = connector.probe();
    let mut ingestion = Ingestion::new(fast_config()).with_connector(Box::new(connector));
    ingestion.start()?;
    assert!(wait_for(Duration::from_secs(2), || ingestion
        .latest_frame()
        .is_some()));

    ingestion.stop();
    assert_eq!(probe.live_handles(), 0);
    assert!(ingestion.latest_frame().is_none());
    assert_eq!(ingestion.health().state, ConnectionState::Closed);

    ingestion.stop();
    assert_eq!(probe.live_handles(), 0);
    assert_eq!(probe.close_calls(), 1);
    Ok(())
}

#[test]
fn stop_is_prompt_during_reconnect_delay() -> anyhow::Result<()> {
    let config = SourceConfig {
        reconnect_delay: Duration::from_secs(30),
        ..fast_config()
    };
    let connector = ScriptedConnector::new().then_reads(Step::Lost);
    let mut ingestion = Ingestion::new(config).with_connector(Box::new(connector));
    ingestion.start()?;
    assert!(wait_for(Duration::from_secs(2), || {
        ingestion.health().state == ConnectionState::Degraded
    }));

    let started = Instant::now();
    ingestion.stop();
    assert!(started.elapsed() < Duration::from_secs(1));
    Ok(())
}

#[test]
fn misconfigured_source_fails_start() {
    let connector = ScriptedConnector::new().with_opens([OpenStep::Misconfigured]);
    let mut ingestion = Ingestion::new(fast_config()).with_connector(Box::new(connector));

    let err = ingestion.start().err();
    assert!(matches!(err, Some(IngestError::Configuration(_))));
    assert_eq!(ingestion.health().state, ConnectionState::Failed);
    ingestion.stop();
    ingestion.stop();
}

#[test]
fn stub_source_streams_without_a_camera() -> anyhow::Result<()> {
    let config = SourceConfig {
        source: SourceId::parse("stub://front_camera")?,
        ..fast_config()
    };
    let mut ingestion = Ingestion::new(config);
    ingestion.start()?;

    assert!(wait_for(Duration::from_secs(5), || ingestion
        .latest_frame()
        .is_some()));
    let frame = ingestion.latest_frame().expect("frame");
    assert_eq!(frame.pixels().len(), 64 * 48 * 3);

    ingestion.stop();
    Ok(())
}

#[test]
fn slot_stays_empty_when_stop_times_out_mid_read() -> anyhow::Result<()> {
    let config = SourceConfig {
        shutdown_timeout: Duration::from_millis(50),
        ..fast_config()
    };
    let connector = ScriptedConnector::new().with_read_cost(Duration::from_millis(300));
    let mut ingestion = Ingestion::new(config).with_connector(Box::new(connector));
    ingestion.start()?;
    assert!(wait_for(Duration::from_secs(3), || ingestion
        .latest_frame()
        .is_some()));

    ingestion.stop();
    assert!(ingestion.latest_frame().is_none());
    std::thread::sleep(Duration::from_millis(400));
    assert!(ingestion.latest_frame().is_none());
    Ok(())
}
