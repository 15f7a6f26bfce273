//! Connection state machine and recovery counters.
//!
//! The supervisor is owned by the capture loop and is the only writer of
//! `ConnectionState` and `RecoveryCounters`. It decides what a failure means;
//! the loop performs the resulting close/pause/reopen.
//!
//! Transitions:
//!
//! ```text
//! Closed ──open──> Connecting ──first good read──> Open
//!                      ^                             │ loss / transient burst / stale
//!                      └──── delay + reopen ──── Degraded
//!                                                    │ attempts == max
//!                                                    v
//!                                                 Failed (terminal)
//! ```

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::SourceConfig;
use crate::error::{ConnectionError, IngestError, ReadError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Degraded,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "Closed",
            Self::Connecting => "Connecting",
            Self::Open => "Open",
            Self::Degraded => "Degraded",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters mutated only by the supervisor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecoveryCounters {
    /// Failed reads since the last successful one.
    pub consecutive_failures: u32,
    /// Completed failure-triggered reconnections.
    pub reconnect_count: u64,
    /// Reconnect attempts since the last successful read.
    pub reconnect_attempts: u32,
    /// Completed planned refreshes.
    pub refresh_count: u64,
    pub frames_captured: u64,
    /// Every failed read, transient or not.
    pub failed_reads: u64,
    pub last_success: Option<Instant>,
    pub last_refresh: Option<Instant>,
    pub last_error: Option<IngestError>,
}

/// Immutable view of the supervisor, published after every loop iteration.
#[derive(Clone, Debug)]
pub struct RecoverySnapshot {
    pub state: ConnectionState,
    pub counters: RecoveryCounters,
    /// When the capture loop (or the facade, before start) was created.
    pub started_at: Instant,
    pub handle_open: bool,
    /// Spacing between the two most recent frames.
    pub last_frame_gap: Option<Duration>,
}

impl RecoverySnapshot {
    pub fn initial(started_at: Instant) -> Self {
        Self {
            state: ConnectionState::Closed,
            counters: RecoveryCounters::default(),
            started_at,
            handle_open: false,
            last_frame_gap: None,
        }
    }
}

/// Limits the supervisor enforces, taken from `SourceConfig`.
#[derive(Clone, Debug)]
pub struct RecoveryPolicy {
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub max_transient_failures: u32,
    pub stale_threshold: Duration,
    pub refresh_interval: Duration,
}

impl From<&SourceConfig> for RecoveryPolicy {
    fn from(config: &SourceConfig) -> Self {
        Self {
            max_reconnect_attempts: config.max_reconnect_attempts,
            reconnect_delay: config.reconnect_delay,
            max_transient_failures: config.max_transient_failures,
            stale_threshold: config.stale_threshold,
            refresh_interval: config.refresh_interval,
        }
    }
}

/// Why the supervisor abandoned the current handle.
#[derive(Clone, Debug, PartialEq)]
pub enum Escalation {
    ConnectionLost(String),
    TransientBurst(u32),
    Stale(Duration),
    OpenFailed(String),
}

impl Escalation {
    fn to_error(&self) -> IngestError {
        match self {
            Self::TransientBurst(_) => IngestError::TransientRead(self.to_string()),
            _ => IngestError::ConnectionLost(self.to_string()),
        }
    }
}

impl fmt::Display for Escalation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(reason) => write!(f, "connection lost: {}", reason),
            Self::TransientBurst(count) => write!(f, "{} consecutive failed reads", count),
            Self::Stale(age) => write!(f, "no frame for {:.1}s", age.as_secs_f64()),
            Self::OpenFailed(reason) => write!(f, "open failed: {}", reason),
        }
    }
}

/// What the capture loop should do next.
#[derive(Clone, Debug, PartialEq)]
pub enum Recovery {
    /// Close, wait `delay`, reopen.
    Reconnect {
        attempt: u32,
        max: u32,
        delay: Duration,
    },
    /// Terminal. The loop exits.
    GiveUp(IngestError),
}

pub struct Supervisor {
    policy: RecoveryPolicy,
    state: ConnectionState,
    counters: RecoveryCounters,
    /// Set between an escalation and the next successful read.
    recovering: bool,
    /// Transient failures since the last success or reopen.
    transient_run: u32,
    opened_at: Option<Instant>,
    last_frame_gap: Option<Duration>,
}

impl Supervisor {
    pub fn new(policy: RecoveryPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Closed,
            counters: RecoveryCounters::default(),
            recovering: false,
            transient_run: 0,
            opened_at: None,
            last_frame_gap: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn counters(&self) -> &RecoveryCounters {
        &self.counters
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// An open attempt is about to start.
    pub fn on_open_attempt(&mut self) {
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Connecting;
        }
    }

    /// A handle was opened. `Open` still waits for the first good read.
    pub fn on_opened(&mut self, now: Instant) {
        self.opened_at = Some(now);
        self.counters.last_refresh = Some(now);
        self.transient_run = 0;
    }

    /// Configuration errors are terminal; anything else is an escalation.
    pub fn on_open_failed(&mut self, err: ConnectionError) -> Recovery {
        match err {
            ConnectionError::Configuration(reason) => {
                log::error!("Supervisor: source cannot be opened: {}", reason);
                let err = IngestError::Configuration(reason);
                self.state = ConnectionState::Failed;
                self.counters.last_error = Some(err.clone());
                Recovery::GiveUp(err)
            }
            ConnectionError::Unavailable(reason) => {
                self.escalate(Escalation::OpenFailed(reason))
            }
        }
    }

    /// Record a published frame. Returns true when it completed a reconnection.
    pub fn on_frame(&mut self, now: Instant) -> bool {
        if let Some(previous) = self.counters.last_success {
            self.last_frame_gap = Some(now.saturating_duration_since(previous));
        }
        self.counters.frames_captured += 1;
        self.counters.last_success = Some(now);
        self.counters.consecutive_failures = 0;
        self.transient_run = 0;

        let mut reconnected = false;
        if self.recovering {
            self.recovering = false;
            self.counters.reconnect_count += 1;
            self.counters.reconnect_attempts = 0;
            reconnected = true;
            log::info!(
                "Supervisor: reconnect success (total reconnects: {})",
                self.counters.reconnect_count
            );
        }
        self.state = ConnectionState::Open;
        reconnected
    }

    /// Count a failed read. Connection loss and a long transient run escalate.
    pub fn on_read_error(&mut self, err: ReadError) -> Option<Recovery> {
        self.counters.consecutive_failures = self.counters.consecutive_failures.saturating_add(1);
        self.counters.failed_reads += 1;

        if !err.is_transient() {
            let reason = match err {
                ReadError::ConnectionLost(reason) => reason,
                other => other.to_string(),
            };
            return Some(self.escalate(Escalation::ConnectionLost(reason)));
        }

        self.transient_run += 1;
        log::debug!(
            "Supervisor: transient read failure {}/{}: {}",
            self.transient_run,
            self.policy.max_transient_failures,
            err
        );
        self.counters.last_error = Some(err.into());
        if self.transient_run >= self.policy.max_transient_failures {
            let run = self.transient_run;
            return Some(self.escalate(Escalation::TransientBurst(run)));
        }
        None
    }

    /// Escalate when nothing has arrived within the stale threshold.
    ///
    /// Measured from the later of the last frame and the last (re)open, so a
    /// fresh handle gets a full threshold to deliver.
    pub fn check_stale(&mut self, now: Instant) -> Option<Recovery> {
        if !matches!(
            self.state,
            ConnectionState::Open | ConnectionState::Connecting
        ) {
            return None;
        }
        let reference = match (self.counters.last_success, self.opened_at) {
            (Some(frame), Some(opened)) => frame.max(opened),
            (Some(frame), None) => frame,
            (None, Some(opened)) => opened,
            (None, None) => return None,
        };
        let age = now.saturating_duration_since(reference);
        if age > self.policy.stale_threshold {
            log::warn!(
                "Supervisor: stream stale, no frame for {:.1}s",
                age.as_secs_f64()
            );
            return Some(self.escalate(Escalation::Stale(age)));
        }
        None
    }

    pub fn refresh_due(&self, now: Instant) -> bool {
        self.state == ConnectionState::Open
            && self
                .counters
                .last_refresh
                .is_some_and(|at| now.saturating_duration_since(at) >= self.policy.refresh_interval)
    }

    /// A planned refresh reopened the handle.
    pub fn on_refreshed(&mut self, now: Instant) {
        self.on_opened(now);
        self.counters.refresh_count += 1;
        self.counters.reconnect_attempts = 0;
    }

    /// The loop is exiting because of a stop request.
    pub fn on_stopped(&mut self) {
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Closed;
        }
    }

    pub fn snapshot(&self, started_at: Instant, handle_open: bool) -> RecoverySnapshot {
        RecoverySnapshot {
            state: self.state,
            counters: self.counters.clone(),
            started_at,
            handle_open,
            last_frame_gap: self.last_frame_gap,
        }
    }

    fn escalate(&mut self, reason: Escalation) -> Recovery {
        self.recovering = true;
        self.transient_run = 0;
        self.counters.reconnect_attempts = self.counters.reconnect_attempts.saturating_add(1);
        let attempt = self.counters.reconnect_attempts;
        let max = self.policy.max_reconnect_attempts;

        if attempt >= max {
            log::error!(
                "Supervisor: {}; reconnect budget exhausted after {} attempts",
                reason,
                attempt
            );
            let err = IngestError::ReconnectExhausted(attempt);
            self.state = ConnectionState::Failed;
            self.counters.last_error = Some(err.clone());
            return Recovery::GiveUp(err);
        }

        log::warn!(
            "Supervisor: {}; reconnect attempt {}/{} in {:.1}s",
            reason,
            attempt,
            max,
            self.policy.reconnect_delay.as_secs_f64()
        );
        self.counters.last_error = Some(reason.to_error());
        self.state = ConnectionState::Degraded;
        Recovery::Reconnect {
            attempt,
            max,
            delay: self.policy.reconnect_delay,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
