use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::IngestError;

const DEFAULT_SOURCE: &str = "stub://front_camera";
const DEFAULT_WIDTH: u32 = 480;
const DEFAULT_HEIGHT: u32 = 360;
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_MAX_TRANSIENT_FAILURES: u32 = 30;
const DEFAULT_DRAIN_EVERY: u64 = 10;
const DEFAULT_DRAIN_MAX: usize = 3;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_SKIP_FRAMES: u32 = 5;
const DEFAULT_HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);

// ----------------------------------------------------------------------------
// SourceId
// ----------------------------------------------------------------------------

/// Identifies one logical camera source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceId {
    /// Local capture device index (`0` -> `/dev/video0`).
    Device(u32),
    /// Network or synthetic stream URI.
    Uri(String),
}

impl SourceId {
    /// All-digit strings are device indices; anything else is a URI.
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IngestError::Configuration("source must not be empty".into()));
        }
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            let index = raw.parse().map_err(|_| {
                IngestError::Configuration(format!("device index out of range: {}", raw))
            })?;
            return Ok(Self::Device(index));
        }
        Ok(Self::Uri(raw.to_string()))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(index) => write!(f, "device:{}", index),
            Self::Uri(uri) => f.write_str(uri),
        }
    }
}

// ----------------------------------------------------------------------------
// SourceConfig
// ----------------------------------------------------------------------------

/// Immutable per-source capture configuration.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    pub source: SourceId,
    /// Transport-level buffering requested from the backend. Fixed at 1.
    pub buffer_depth: usize,
    /// Upper bound on a single blocking read.
    pub read_timeout: Duration,
    /// Output frame width after resize.
    pub width: u32,
    /// Output frame height after resize.
    pub height: u32,
    /// Frame rate requested from the source.
    pub target_fps: u32,
    /// Planned close+reopen cadence.
    pub refresh_interval: Duration,
    /// Age after which the latest frame no longer counts as live.
    pub stale_threshold: Duration,
    pub max_reconnect_attempts: u32,
    /// Pause between closing and reopening during recovery.
    pub reconnect_delay: Duration,
    /// Consecutive transient read failures tolerated before reconnecting.
    pub max_transient_failures: u32,
    /// Drain buffered frames after this many successful reads.
    pub drain_every: u64,
    /// Frames discarded per drain.
    pub drain_max: usize,
    /// Upper bound on `stop()` waiting for the capture thread.
    pub shutdown_timeout: Duration,
}

impl SourceConfig {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            buffer_depth: 1,
            read_timeout: DEFAULT_READ_TIMEOUT,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            target_fps: DEFAULT_TARGET_FPS,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_transient_failures: DEFAULT_MAX_TRANSIENT_FAILURES,
            drain_every: DEFAULT_DRAIN_EVERY,
            drain_max: DEFAULT_DRAIN_MAX,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        let fail = |msg: &str| Err(IngestError::Configuration(msg.to_string()));
        if self.buffer_depth == 0 {
            return fail("buffer depth must be at least 1");
        }
        if self.width == 0 || self.height == 0 {
            return fail("target dimensions must be greater than zero");
        }
        if self.read_timeout.is_zero() {
            return fail("read timeout must be greater than zero");
        }
        if self.refresh_interval.is_zero() {
            return fail("refresh interval must be greater than zero");
        }
        if self.stale_threshold.is_zero() {
            return fail("stale threshold must be greater than zero");
        }
        if self.max_reconnect_attempts == 0 {
            return fail("max reconnect attempts must be greater than zero");
        }
        if self.max_transient_failures == 0 {
            return fail("max transient failures must be greater than zero");
        }
        if self.drain_every == 0 {
            return fail("drain cadence must be greater than zero");
        }
        if self.shutdown_timeout.is_zero() {
            return fail("shutdown timeout must be greater than zero");
        }
        if let SourceId::Uri(uri) = &self.source {
            if uri.trim().is_empty() {
                return fail("source must not be empty");
            }
        }
        Ok(())
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::new(SourceId::Uri(DEFAULT_SOURCE.to_string()))
    }
}

/// Parse a `WxH` resolution string.
pub fn parse_resolution(raw: &str) -> Result<(u32, u32)> {
    let (w, h) = raw
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("resolution must look like WIDTHxHEIGHT, got '{}'", raw))?;
    let width: u32 = w.trim().parse().with_context(|| format!("invalid width in '{}'", raw))?;
    let height: u32 = h
        .trim()
        .parse()
        .with_context(|| format!("invalid height in '{}'", raw))?;
    if width == 0 || height == 0 {
        return Err(anyhow!("resolution must be non-zero, got '{}'", raw));
    }
    Ok((width, height))
}

// ----------------------------------------------------------------------------
// GuardianConfig: file + environment loading
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
struct GuardianConfigFile {
    source: Option<String>,
    resolution: Option<String>,
    target_fps: Option<u32>,
    capture: Option<CaptureConfigFile>,
    consumer: Option<ConsumerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    read_timeout_secs: Option<f64>,
    refresh_interval_secs: Option<f64>,
    stale_threshold_secs: Option<f64>,
    max_reconnect_attempts: Option<u32>,
    reconnect_delay_secs: Option<f64>,
    max_transient_failures: Option<u32>,
    drain_every: Option<u64>,
    drain_max: Option<usize>,
    shutdown_timeout_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct ConsumerConfigFile {
    skip_frames: Option<u32>,
    display: Option<bool>,
    health_log_secs: Option<f64>,
}

/// Settings for the polling consumer in front of the detection pipeline.
#[derive(Clone, Debug)]
pub struct ConsumerSettings {
    /// Hand every Nth new frame to detection.
    pub skip_frames: u32,
    pub display: bool,
    /// Status line cadence.
    pub health_log_interval: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            skip_frames: DEFAULT_SKIP_FRAMES,
            display: true,
            health_log_interval: DEFAULT_HEALTH_LOG_INTERVAL,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GuardianConfig {
    pub source: SourceConfig,
    pub consumer: ConsumerSettings,
}

impl GuardianConfig {
    /// Load from `GUARDIAN_CONFIG` (JSON, or TOML for `.toml` paths), then apply
    /// `GUARDIAN_*` environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GUARDIAN_CONFIG").ok();
        let path = config_path
            .as_deref()
            .filter(|path| !path.trim().is_empty())
            .map(Path::new);
        Self::load_from(path)
    }

    /// Like `load`, with the config file path given explicitly.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => GuardianConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GuardianConfigFile) -> Result<Self> {
        let source = SourceId::parse(file.source.as_deref().unwrap_or(DEFAULT_SOURCE))?;
        let mut source = SourceConfig::new(source);
        if let Some(resolution) = file.resolution.as_deref() {
            let (width, height) = parse_resolution(resolution)?;
            source.width = width;
            source.height = height;
        }
        if let Some(fps) = file.target_fps {
            source.target_fps = fps;
        }

        let capture = file.capture.unwrap_or_default();
        if let Some(secs) = capture.read_timeout_secs {
            source.read_timeout = secs_field("capture.read_timeout_secs", secs)?;
        }
        if let Some(secs) = capture.refresh_interval_secs {
            source.refresh_interval = secs_field("capture.refresh_interval_secs", secs)?;
        }
        if let Some(secs) = capture.stale_threshold_secs {
            source.stale_threshold = secs_field("capture.stale_threshold_secs", secs)?;
        }
        if let Some(max) = capture.max_reconnect_attempts {
            source.max_reconnect_attempts = max;
        }
        if let Some(secs) = capture.reconnect_delay_secs {
            source.reconnect_delay = secs_field("capture.reconnect_delay_secs", secs)?;
        }
        if let Some(max) = capture.max_transient_failures {
            source.max_transient_failures = max;
        }
        if let Some(every) = capture.drain_every {
            source.drain_every = every;
        }
        if let Some(max) = capture.drain_max {
            source.drain_max = max;
        }
        if let Some(secs) = capture.shutdown_timeout_secs {
            source.shutdown_timeout = secs_field("capture.shutdown_timeout_secs", secs)?;
        }

        let consumer_file = file.consumer.unwrap_or_default();
        let mut consumer = ConsumerSettings::default();
        if let Some(skip) = consumer_file.skip_frames {
            consumer.skip_frames = skip;
        }
        if let Some(display) = consumer_file.display {
            consumer.display = display;
        }
        if let Some(secs) = consumer_file.health_log_secs {
            consumer.health_log_interval = secs_field("consumer.health_log_secs", secs)?;
        }

        Ok(Self { source, consumer })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("GUARDIAN_SOURCE") {
            if !source.trim().is_empty() {
                self.source.source = SourceId::parse(&source)?;
            }
        }
        if let Ok(resolution) = std::env::var("GUARDIAN_RESOLUTION") {
            if !resolution.trim().is_empty() {
                let (width, height) = parse_resolution(&resolution)?;
                self.source.width = width;
                self.source.height = height;
            }
        }
        if let Ok(fps) = std::env::var("GUARDIAN_TARGET_FPS") {
            self.source.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("GUARDIAN_TARGET_FPS must be an integer"))?;
        }
        if let Ok(skip) = std::env::var("GUARDIAN_SKIP_FRAMES") {
            self.consumer.skip_frames = skip
                .trim()
                .parse()
                .map_err(|_| anyhow!("GUARDIAN_SKIP_FRAMES must be an integer"))?;
        }
        if let Ok(secs) = std::env::var("GUARDIAN_REFRESH_SECS") {
            let secs: f64 = secs
                .trim()
                .parse()
                .map_err(|_| anyhow!("GUARDIAN_REFRESH_SECS must be a number of seconds"))?;
            self.source.refresh_interval = secs_field("GUARDIAN_REFRESH_SECS", secs)?;
        }
        if let Ok(value) = std::env::var("GUARDIAN_NO_DISPLAY") {
            if matches!(value.trim(), "1" | "true" | "yes") {
                self.consumer.display = false;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.source.validate()?;
        if self.consumer.skip_frames == 0 {
            return Err(anyhow!("skip_frames must be at least 1"));
        }
        if self.consumer.health_log_interval.is_zero() {
            return Err(anyhow!("health log interval must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<GuardianConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn secs_field(name: &str, secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(anyhow!("{} must be a positive number of seconds", name));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("{} is out of range: {}", name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_sources_are_device_indices() -> Result<()> {
        assert_eq!(SourceId::parse("0")?, SourceId::Device(0));
        assert_eq!(SourceId::parse(" 2 ")?, SourceId::Device(2));
        assert_eq!(
            SourceId::parse("http://172.18.132.254:8080/video")?,
            SourceId::Uri("http://172.18.132.254:8080/video".to_string())
        );
        assert!(SourceId::parse("   ").is_err());
        Ok(())
    }

    #[test]
    fn resolution_parsing() -> Result<()> {
        assert_eq!(parse_resolution("480x360")?, (480, 360));
        assert_eq!(parse_resolution("1280X720")?, (1280, 720));
        assert!(parse_resolution("480").is_err());
        assert!(parse_resolution("0x360").is_err());
        assert!(parse_resolution("wide x tall").is_err());
        Ok(())
    }

    #[test]
    fn validation_rejects_degenerate_values() {
        let base = SourceConfig::default();
        assert!(base.validate().is_ok());

        let mut cfg = base.clone();
        cfg.buffer_depth = 0;
        assert!(matches!(cfg.validate(), Err(IngestError::Configuration(_))));

        let mut cfg = base.clone();
        cfg.width = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base.clone();
        cfg.stale_threshold = Duration::ZERO;
        assert!(cfg.validate().is_err());

        let mut cfg = base;
        cfg.max_reconnect_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn file_defaults_follow_camera_wrapper() -> Result<()> {
        let cfg = GuardianConfig::from_file(GuardianConfigFile::default())?;
        assert_eq!((cfg.source.width, cfg.source.height), (480, 360));
        assert_eq!(cfg.source.refresh_interval, Duration::from_secs(300));
        assert_eq!(cfg.source.stale_threshold, Duration::from_secs(5));
        assert_eq!(cfg.source.max_reconnect_attempts, 5);
        assert_eq!(cfg.source.reconnect_delay, Duration::from_secs(2));
        assert_eq!(cfg.consumer.skip_frames, 5);
        assert_eq!(cfg.consumer.health_log_interval, Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn negative_durations_are_rejected() {
        let file = GuardianConfigFile {
            capture: Some(CaptureConfigFile {
                stale_threshold_secs: Some(-1.0),
                ..CaptureConfigFile::default()
            }),
            ..GuardianConfigFile::default()
        };
        assert!(GuardianConfig::from_file(file).is_err());
    }
}
