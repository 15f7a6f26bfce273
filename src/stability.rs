//! Stream stability measurement for `stream_check`.
//!
//! A `StabilityMonitor` is fed every poll of an `Ingestion`. It counts new
//! frames by sequence number, samples the frame rate once per second and keeps
//! a health sample every 100 new frames.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::health::HealthReport;

const FPS_WINDOW: Duration = Duration::from_secs(1);
const HEALTH_SAMPLE_EVERY: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Verdict {
    Stable,
    Acceptable,
    Unstable,
}

impl Verdict {
    /// Stable: under 5% failed reads and above 8 fps. Acceptable: under 15%
    /// and above 5 fps.
    pub fn from_measurements(failure_rate: f64, avg_fps: f64) -> Self {
        if failure_rate < 0.05 && avg_fps > 8.0 {
            Self::Stable
        } else if failure_rate < 0.15 && avg_fps > 5.0 {
            Self::Acceptable
        } else {
            Self::Unstable
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stable => "STABLE",
            Self::Acceptable => "ACCEPTABLE",
            Self::Unstable => "UNSTABLE",
        })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StabilityReport {
    pub duration_secs: f64,
    pub frames_seen: u64,
    pub frames_captured: u64,
    pub failed_reads: u64,
    /// failed / (captured + failed)
    pub failure_rate: f64,
    pub avg_fps: f64,
    pub min_fps: f64,
    pub max_fps: f64,
    pub reconnect_count: u64,
    pub refresh_count: u64,
    pub health_samples: Vec<HealthReport>,
    pub final_health: HealthReport,
    pub verdict: Verdict,
}

#[derive(Debug)]
pub struct StabilityMonitor {
    started: Instant,
    window_start: Instant,
    window_frames: u64,
    fps_samples: Vec<f64>,
    frames_seen: u64,
    last_sequence: Option<u64>,
    health_samples: Vec<HealthReport>,
}

impl StabilityMonitor {
    pub fn new(now: Instant) -> Self {
        Self {
            started: now,
            window_start: now,
            window_frames: 0,
            fps_samples: Vec::new(),
            frames_seen: 0,
            last_sequence: None,
            health_samples: Vec::new(),
        }
    }

    /// Record one poll. Returns true when `frame` is new since the last poll.
    pub fn observe(&mut self, frame: Option<&Frame>, now: Instant) -> bool {
        let fresh = match frame {
            Some(frame) if self.last_sequence != Some(frame.sequence) => {
                self.last_sequence = Some(frame.sequence);
                self.frames_seen += 1;
                self.window_frames += 1;
                true
            }
            _ => false,
        };

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= FPS_WINDOW {
            self.fps_samples
                .push(self.window_frames as f64 / elapsed.as_secs_f64());
            self.window_frames = 0;
            self.window_start = now;
        }
        fresh
    }

    /// True right after every 100th new frame.
    pub fn wants_health_sample(&self) -> bool {
        self.frames_seen > 0 && self.frames_seen.is_multiple_of(HEALTH_SAMPLE_EVERY)
    }

    pub fn record_health(&mut self, report: HealthReport) {
        self.health_samples.push(report);
    }

    pub fn fps_samples(&self) -> &[f64] {
        &self.fps_samples
    }

    pub fn finish(self, final_health: HealthReport, now: Instant) -> StabilityReport {
        let duration = now.saturating_duration_since(self.started).as_secs_f64();
        let captured = final_health.frames_captured;
        let failed = final_health.failed_reads;
        let attempts = captured + failed;
        let failure_rate = if attempts == 0 {
            1.0
        } else {
            failed as f64 / attempts as f64
        };

        let (avg_fps, min_fps, max_fps) = if self.fps_samples.is_empty() {
            let avg = if duration > 0.0 {
                self.frames_seen as f64 / duration
            } else {
                0.0
            };
            (avg, avg, avg)
        } else {
            let sum: f64 = self.fps_samples.iter().sum();
            let min = self.fps_samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = self.fps_samples.iter().copied().fold(0.0, f64::max);
            (sum / self.fps_samples.len() as f64, min, max)
        };

        StabilityReport {
            duration_secs: duration,
            frames_seen: self.frames_seen,
            frames_captured: captured,
            failed_reads: failed,
            failure_rate,
            avg_fps,
            min_fps,
            max_fps,
            reconnect_count: final_health.reconnect_count,
            refresh_count: final_health.refresh_count,
            health_samples: self.health_samples,
            verdict: Verdict::from_measurements(failure_rate, avg_fps),
            final_health,
        }
    }
}

impl fmt::Display for StabilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Stream stability report")?;
        writeln!(f, "  duration:        {:.1}s", self.duration_secs)?;
        writeln!(f, "  frames seen:     {}", self.frames_seen)?;
        writeln!(f, "  frames captured: {}", self.frames_captured)?;
        writeln!(
            f,
            "  failed reads:    {} ({:.1}%)",
            self.failed_reads,
            self.failure_rate * 100.0
        )?;
        writeln!(
            f,
            "  fps:             avg {:.1} / min {:.1} / max {:.1}",
            self.avg_fps, self.min_fps, self.max_fps
        )?;
        writeln!(f, "  reconnects:      {}", self.reconnect_count)?;
        writeln!(f, "  refreshes:       {}", self.refresh_count)?;
        writeln!(f, "  final health:    {}", self.final_health)?;
        write!(f, "  verdict:         {}", self.verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameSlot;
    use std::time::SystemTime;
    use crate::supervisor::{ConnectionState, RecoverySnapshot};

    fn final_health(captured: u64, failed: u64) -> HealthReport {
        let mut snapshot = RecoverySnapshot::initial(Instant::now());
        snapshot.state = ConnectionState::Open;
        snapshot.counters.frames_captured = captured;
        snapshot.counters.failed_reads = failed;
        crate::health::assess(&snapshot, None, Duration::from_secs(5), Instant::now())
    }

    #[test]
    fn verdict_thresholds() {
        assert_eq!(Verdict::from_measurements(0.01, 9.5), Verdict::Stable);
        assert_eq!(Verdict::from_measurements(0.10, 9.5), Verdict::Acceptable);
        assert_eq!(Verdict::from_measurements(0.01, 6.0), Verdict::Acceptable);
        assert_eq!(Verdict::from_measurements(0.20, 9.5), Verdict::Unstable);
        assert_eq!(Verdict::from_measurements(0.01, 4.0), Verdict::Unstable);
    }

    #[test]
    fn repeated_sequences_are_not_counted_twice() {
        let slot = FrameSlot::new();
        let start = Instant::now();
        let mut monitor = StabilityMonitor::new(start);

        assert!(!monitor.observe(slot.latest().as_deref(), start));
        slot.publish(vec![0u8; 3], 1, 1, start, SystemTime::now());
        assert!(monitor.observe(slot.latest().as_deref(), start));
        assert!(!monitor.observe(slot.latest().as_deref(), start));
        slot.publish(vec![0u8; 3], 1, 1, start, SystemTime::now());
        assert!(monitor.observe(slot.latest().as_deref(), start));

        let report = monitor.finish(final_health(2, 0), start + Duration::from_secs(1));
        assert_eq!(report.frames_seen, 2);
    }

    #[test]
    fn fps_sampled_per_window() {
        let slot = FrameSlot::new();
        let start = Instant::now();
        let mut monitor = StabilityMonitor::new(start);

        for i in 1..=20u64 {
            let at = start + Duration::from_millis(i * 100);
            slot.publish(vec![0u8; 3], 1, 1, at, SystemTime::now());
            monitor.observe(slot.latest().as_deref(), at);
        }

        assert_eq!(monitor.fps_samples().len(), 2);
        assert!((monitor.fps_samples()[0] - 10.0).abs() < 1e-9);

        let report = monitor.finish(final_health(20, 1), start + Duration::from_secs(2));
        assert!((report.avg_fps - 10.0).abs() < 1e-9);
        assert!((report.failure_rate - 1.0 / 21.0).abs() < 1e-9);
        assert_eq!(report.verdict, Verdict::Stable);
    }

    #[test]
    fn health_sampled_every_hundred_frames() {
        let slot = FrameSlot::new();
        let start = Instant::now();
        let mut monitor = StabilityMonitor::new(start);
        let mut samples = 0;
        for _ in 0..250 {
            slot.publish(vec![0u8; 3], 1, 1, start, SystemTime::now());
            monitor.observe(slot.latest().as_deref(), start);
            if monitor.wants_health_sample() {
                samples += 1;
            }
        }
        assert_eq!(samples, 2);
    }

    #[test]
    fn no_reads_is_unstable() {
        let start = Instant::now();
        let monitor = StabilityMonitor::new(start);
        let report = monitor.finish(final_health(0, 0), start + Duration::from_secs(3));
        assert_eq!(report.verdict, Verdict::Unstable);
    }
}
