//! Health reporting.
//!
//! `assess` is a pure function of the published recovery snapshot, the
//! capture instant of the latest frame and the current time. Nothing here
//! keeps timers or mutates state.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::supervisor::{ConnectionState, RecoverySnapshot};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub seconds_since_last_frame: f64,
    pub reconnect_count: u64,
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub reconnect_attempts: u32,
    pub refresh_count: u64,
    pub frames_captured: u64,
    pub failed_reads: u64,
    pub last_error: Option<String>,
}

/// Build a report for `now`.
///
/// Frame age is measured from the latest frame, or from loop start when no
/// frame has been captured yet. A `Closed` source (not started, or stopped) is
/// never healthy.
pub fn assess(
    snapshot: &RecoverySnapshot,
    last_frame_at: Option<Instant>,
    stale_threshold: Duration,
    now: Instant,
) -> HealthReport {
    let reference = last_frame_at.unwrap_or(snapshot.started_at);
    let age = now.saturating_duration_since(reference);
    let running = !matches!(
        snapshot.state,
        ConnectionState::Failed | ConnectionState::Closed
    );
    let counters = &snapshot.counters;

    HealthReport {
        healthy: running && age < stale_threshold,
        seconds_since_last_frame: age.as_secs_f64(),
        reconnect_count: counters.reconnect_count,
        state: snapshot.state,
        consecutive_failures: counters.consecutive_failures,
        reconnect_attempts: counters.reconnect_attempts,
        refresh_count: counters.refresh_count,
        frames_captured: counters.frames_captured,
        failed_reads: counters.failed_reads,
        last_error: counters.last_error.as_ref().map(|e| e.to_string()),
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state={} healthy={} last_frame={:.1}s frames={} failed_reads={} reconnects={} refreshes={}",
            self.state,
            self.healthy,
            self.seconds_since_last_frame,
            self.frames_captured,
            self.failed_reads,
            self.reconnect_count,
            self.refresh_count
        )?;
        if self.reconnect_attempts > 0 {
            write!(f, " attempts={}", self.reconnect_attempts)?;
        }
        if let Some(err) = &self.last_error {
            write!(f, " last_error=\"{}\"", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IngestError;

    fn snapshot(state: ConnectionState, started_at: Instant) -> RecoverySnapshot {
        RecoverySnapshot {
            state,
            ..RecoverySnapshot::initial(started_at)
        }
    }

    #[test]
    fn recent_frame_while_open_is_healthy() {
        let start = Instant::now();
        let snap = snapshot(ConnectionState::Open, start);
        let report = assess(
            &snap,
            Some(start + Duration::from_secs(1)),
            Duration::from_secs(5),
            start + Duration::from_secs(3),
        );
        assert!(report.healthy);
        assert!((report.seconds_since_last_frame - 2.0).abs() < 1e-9);
    }

    #[test]
    fn stale_frame_is_unhealthy_even_when_open() {
        let start = Instant::now();
        let snap = snapshot(ConnectionState::Open, start);
        let report = assess(
            &snap,
            Some(start),
            Duration::from_secs(5),
            start + Duration::from_secs(6),
        );
        assert!(!report.healthy);
    }

    #[test]
    fn failed_and_closed_are_never_healthy() {
        let start = Instant::now();
        for state in [ConnectionState::Failed, ConnectionState::Closed] {
            let report = assess(
                &snapshot(state, start),
                Some(start),
                Duration::from_secs(5),
                start,
            );
            assert!(!report.healthy, "{} reported healthy", state);
        }
    }

    #[test]
    fn age_counts_from_start_before_first_frame() {
        let start = Instant::now();
        let snap = snapshot(ConnectionState::Connecting, start);
        let stale = Duration::from_secs(5);

        assert!(assess(&snap, None, stale, start + Duration::from_secs(4)).healthy);
        assert!(!assess(&snap, None, stale, start + Duration::from_secs(5)).healthy);
    }

    #[test]
    fn status_line_includes_last_error() {
        let start = Instant::now();
        let mut snap = snapshot(ConnectionState::Failed, start);
        snap.counters.last_error = Some(IngestError::ReconnectExhausted(5));
        snap.counters.reconnect_attempts = 5;

        let line = assess(&snap, None, Duration::from_secs(5), start).to_string();
        assert!(line.starts_with("state=Failed healthy=false"));
        assert!(line.contains("attempts=5"));
        assert!(line.contains("reconnect attempts exhausted after 5 attempts"));
    }
}
