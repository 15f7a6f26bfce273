use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use guardian_ingest::{GuardianConfig, SourceId};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GUARDIAN_CONFIG",
        "GUARDIAN_SOURCE",
        "GUARDIAN_RESOLUTION",
        "GUARDIAN_TARGET_FPS",
        "GUARDIAN_SKIP_FRAMES",
        "GUARDIAN_REFRESH_SECS",
        "GUARDIAN_NO_DISPLAY",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": "rtsp://camera-1/stream",
        "resolution": "640x480",
        "target_fps": 12,
        "capture": {
            "stale_threshold_secs": 8,
            "max_reconnect_attempts": 3,
            "reconnect_delay_secs": 0.5
        },
        "consumer": {
            "skip_frames": 2,
            "health_log_secs": 10
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("GUARDIAN_CONFIG", file.path());
    std::env::set_var("GUARDIAN_SOURCE", "1");
    std::env::set_var("GUARDIAN_NO_DISPLAY", "1");

    let cfg = GuardianConfig::load().expect("load config");

    assert_eq!(cfg.source.source, SourceId::Device(1));
    assert_eq!((cfg.source.width, cfg.source.height), (640, 480));
    assert_eq!(cfg.source.target_fps, 12);
    assert_eq!(cfg.source.stale_threshold, Duration::from_secs(8));
    assert_eq!(cfg.source.max_reconnect_attempts, 3);
    assert_eq!(cfg.source.reconnect_delay, Duration::from_millis(500));
    assert_eq!(cfg.source.refresh_interval, Duration::from_secs(300));
    assert_eq!(cfg.source.buffer_depth, 1);
    assert_eq!(cfg.consumer.skip_frames, 2);
    assert_eq!(cfg.consumer.health_log_interval, Duration::from_secs(10));
    assert!(!cfg.consumer.display);

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
source = "http://172.18.132.254:8080/video"
resolution = "480x360"

[capture]
refresh_interval_secs = 120
drain_every = 5
drain_max = 2
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = GuardianConfig::load_from(Some(file.path())).expect("load config");

    assert_eq!(
        cfg.source.source,
        SourceId::Uri("http://172.18.132.254:8080/video".into())
    );
    assert_eq!(cfg.source.refresh_interval, Duration::from_secs(120));
    assert_eq!(cfg.source.drain_every, 5);
    assert_eq!(cfg.source.drain_max, 2);
    assert!(cfg.consumer.display);

    clear_env();
}

#[test]
fn env_only_defaults_and_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("GUARDIAN_RESOLUTION", "320x240");
    std::env::set_var("GUARDIAN_TARGET_FPS", "15");
    std::env::set_var("GUARDIAN_REFRESH_SECS", "60");

    let cfg = GuardianConfig::load().expect("load config");
    assert_eq!(
        cfg.source.source,
        SourceId::Uri("stub://front_camera".into())
    );
    assert_eq!((cfg.source.width, cfg.source.height), (320, 240));
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.source.refresh_interval, Duration::from_secs(60));

    clear_env();
}

#[test]
fn invalid_values_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("GUARDIAN_RESOLUTION", "wide");
    assert!(GuardianConfig::load().is_err());
    clear_env();

    std::env::set_var("GUARDIAN_SKIP_FRAMES", "0");
    assert!(GuardianConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    assert!(GuardianConfig::load_from(Some(file.path())).is_err());

    clear_env();
}
