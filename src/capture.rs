//! Background capture loop.
//!
//! One loop per source. It exclusively owns the connection handle, feeds the
//! supervisor, publishes frames into the shared slot and a status snapshot
//! after every iteration. `step` runs one iteration and is what tests drive
//! directly with a manual clock; `run` repeats it until stop or `Failed`.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::config::SourceConfig;
use crate::error::{IngestError, ReadError};
use crate::frame::FrameSlot;
use crate::ingest::normalize::normalize_frame;
use crate::ingest::{frame_interval, ConnectionHandle, Connector};
use crate::supervisor::{ConnectionState, Recovery, RecoveryPolicy, RecoverySnapshot, Supervisor};

/// Pause between closing and reopening during a planned refresh.
const REFRESH_PAUSE: Duration = Duration::from_millis(500);
/// Longest uninterrupted sleep inside reconnect and refresh waits.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// State shared between the capture loop and the facade.
#[derive(Clone)]
pub struct CaptureShared {
    pub slot: Arc<FrameSlot>,
    pub status: Arc<ArcSwap<RecoverySnapshot>>,
    pub stop: Arc<AtomicBool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Exit,
}

pub struct CaptureLoop {
    config: SourceConfig,
    connector: Box<dyn Connector>,
    handle: Option<Box<dyn ConnectionHandle>>,
    supervisor: Supervisor,
    clock: Arc<dyn Clock>,
    shared: CaptureShared,
    reads_since_drain: u64,
    started_at: Instant,
}

impl CaptureLoop {
    pub fn new(
        config: SourceConfig,
        connector: Box<dyn Connector>,
        clock: Arc<dyn Clock>,
        shared: CaptureShared,
    ) -> Self {
        let supervisor = Supervisor::new(RecoveryPolicy::from(&config));
        let started_at = clock.now();
        Self {
            config,
            connector,
            handle: None,
            supervisor,
            clock,
            shared,
            reads_since_drain: 0,
            started_at,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Attempt to open a handle.
    ///
    /// Only a configuration error is returned; an unreachable source is handed
    /// to the supervisor and retried by later steps.
    pub fn connect(&mut self) -> Result<(), IngestError> {
        self.supervisor.on_open_attempt();
        match self.connector.open(&self.config) {
            Ok(handle) => {
                self.install(handle);
                self.supervisor.on_opened(self.clock.now());
                Ok(())
            }
            Err(err) => match self.supervisor.on_open_failed(err) {
                Recovery::GiveUp(err @ IngestError::Configuration(_)) => Err(err),
                _ => Ok(()),
            },
        }
    }

    /// Run one iteration.
    pub fn step(&mut self) -> StepOutcome {
        if self.stop_requested() {
            return StepOutcome::Exit;
        }
        let outcome = match self.supervisor.state() {
            ConnectionState::Failed => StepOutcome::Exit,
            ConnectionState::Closed => {
                if let Err(err) = self.connect() {
                    log::error!("CaptureLoop: {}", err);
                }
                StepOutcome::Continue
            }
            ConnectionState::Degraded => {
                self.reconnect();
                StepOutcome::Continue
            }
            ConnectionState::Connecting | ConnectionState::Open => {
                self.capture_once();
                StepOutcome::Continue
            }
        };
        self.publish_status();
        outcome
    }

    /// Loop until stop is requested or the supervisor gives up.
    pub fn run(mut self) {
        log::info!("CaptureLoop: started for {}", self.connector.describe());
        while self.step() == StepOutcome::Continue {}
        self.shutdown();
    }

    /// Close the handle and publish the final state. A requested stop also
    /// clears the slot, which covers a facade that stopped waiting for us.
    pub fn shutdown(&mut self) {
        self.close_handle();
        if self.stop_requested() {
            self.shared.slot.clear();
        }
        self.supervisor.on_stopped();
        self.publish_status();
        log::info!(
            "CaptureLoop: exited for {} (state: {})",
            self.connector.describe(),
            self.supervisor.state()
        );
    }

    pub fn publish_status(&self) {
        let handle_open = self.handle.as_ref().is_some_and(|h| h.is_open());
        self.shared.status.store(Arc::new(
            self.supervisor.snapshot(self.started_at, handle_open),
        ));
    }

    fn capture_once(&mut self) {
        let started = self.clock.now();
        if self.supervisor.refresh_due(started) {
            self.refresh();
            return;
        }

        let (width, height) = (self.config.width, self.config.height);
        let result = match self.handle.as_mut() {
            Some(handle) => handle.read_frame().and_then(|raw| {
                normalize_frame(raw, width, height)
                    .map_err(|e| ReadError::Decode(format!("{:#}", e)))
            }),
            None => Err(ReadError::ConnectionLost("no open handle".into())),
        };
        let now = self.clock.now();
        let interval = frame_interval(self.config.target_fps);

        match result {
            // A stop that arrived during the read owns the slot now.
            Ok(_) if self.stop_requested() => {}
            Ok(pixels) => {
                let wall = self.clock.wall_now();
                self.shared.slot.publish(pixels, width, height, now, wall);
                self.supervisor.on_frame(now);
                self.maybe_drain();
                if let Some(rest) = interval.checked_sub(now.saturating_duration_since(started)) {
                    if !rest.is_zero() {
                        self.clock.sleep(rest);
                    }
                }
            }
            Err(err) => {
                if self.supervisor.on_read_error(err).is_some() {
                    return;
                }
                if self.supervisor.check_stale(now).is_some() {
                    return;
                }
                if !interval.is_zero() {
                    self.clock.sleep(interval);
                }
            }
        }
    }

    fn maybe_drain(&mut self) {
        self.reads_since_drain += 1;
        if self.reads_since_drain < self.config.drain_every {
            return;
        }
        self.reads_since_drain = 0;
        if let Some(handle) = self.handle.as_mut() {
            let dropped = handle.drain(self.config.drain_max);
            if dropped > 0 {
                log::debug!("CaptureLoop: drained {} buffered frames", dropped);
            }
        }
    }

    fn reconnect(&mut self) {
        self.close_handle();
        if !self.pause(self.config.reconnect_delay) {
            return;
        }
        log::info!(
            "CaptureLoop: reopening {} (attempt {}/{})",
            self.connector.describe(),
            self.supervisor.counters().reconnect_attempts,
            self.supervisor.policy().max_reconnect_attempts
        );
        if let Err(err) = self.connect() {
            log::error!("CaptureLoop: {}", err);
        }
    }

    /// Planned close and reopen. Not a failure; the reconnect counter is untouched.
    fn refresh(&mut self) {
        log::info!(
            "CaptureLoop: refreshing {} after {:.0}s",
            self.connector.describe(),
            self.config.refresh_interval.as_secs_f64()
        );
        self.close_handle();
        if !self.pause(REFRESH_PAUSE) {
            return;
        }
        self.supervisor.on_open_attempt();
        match self.connector.open(&self.config) {
            Ok(handle) => {
                self.install(handle);
                self.supervisor.on_refreshed(self.clock.now());
                log::info!(
                    "CaptureLoop: refresh complete (total refreshes: {})",
                    self.supervisor.counters().refresh_count
                );
            }
            Err(err) => {
                log::warn!("CaptureLoop: refresh reopen failed: {}", err);
                self.supervisor.on_open_failed(err);
            }
        }
    }

    fn install(&mut self, handle: Box<dyn ConnectionHandle>) {
        self.close_handle();
        self.handle = Some(handle);
        self.reads_since_drain = 0;
    }

    fn close_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close();
        }
    }

    /// Sleep in slices so a stop request is seen promptly. Returns false if stopped.
    fn pause(&self, total: Duration) -> bool {
        let deadline = self.clock.now() + total;
        loop {
            if self.stop_requested() {
                return false;
            }
            let now = self.clock.now();
            if now >= deadline {
                return true;
            }
            self.clock.sleep((deadline - now).min(STOP_POLL_INTERVAL));
        }
    }

    fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.close_handle();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
