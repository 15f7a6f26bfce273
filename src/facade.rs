//! Ingestion facade.
//!
//! The only surface consumers touch: start the capture thread, poll the latest
//! frame, ask for health, stop. Every query is non-blocking.

use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::capture::{CaptureLoop, CaptureShared};
use crate::clock::{Clock, SystemClock};
use crate::config::SourceConfig;
use crate::error::IngestError;
use crate::frame::{Frame, FrameSlot};
use crate::health::{assess, HealthReport};
use crate::ingest::{connector_for, Connector};
use crate::supervisor::{ConnectionState, RecoverySnapshot};

struct Worker {
    stop: Arc<AtomicBool>,
    done: mpsc::Receiver<()>,
    join: JoinHandle<()>,
}

/// Resilient single-source frame ingestion.
pub struct Ingestion {
    config: SourceConfig,
    connector: Option<Box<dyn Connector>>,
    clock: Arc<dyn Clock>,
    slot: Arc<FrameSlot>,
    status: Arc<ArcSwap<RecoverySnapshot>>,
    worker: Option<Worker>,
}

impl Ingestion {
    /// The backend is picked from `config.source` at `start`.
    pub fn new(config: SourceConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let status = ArcSwap::from_pointee(RecoverySnapshot::initial(clock.now()));
        Self {
            config,
            connector: None,
            clock,
            slot: Arc::new(FrameSlot::new()),
            status: Arc::new(status),
            worker: None,
        }
    }

    /// Use an explicit connector instead of resolving one from the source id.
    /// It is consumed by the next `start`.
    pub fn with_connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.status
            .store(Arc::new(RecoverySnapshot::initial(clock.now())));
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Validate the configuration, launch the capture thread and wait for the
    /// first open attempt.
    ///
    /// Only configuration errors are returned. An unreachable source is left to
    /// the recovery supervisor and shows up in `health()`. Calling `start` on a
    /// running instance is a no-op.
    pub fn start(&mut self) -> Result<(), IngestError> {
        if self.worker.is_some() {
            return Ok(());
        }
        self.config.validate()?;
        let connector = match self.connector.take() {
            Some(connector) => connector,
            None => connector_for(&self.config)?,
        };

        let stop = Arc::new(AtomicBool::new(false));
        let shared = CaptureShared {
            slot: Arc::clone(&self.slot),
            status: Arc::clone(&self.status),
            stop: Arc::clone(&stop),
        };
        let mut capture = CaptureLoop::new(
            self.config.clone(),
            connector,
            Arc::clone(&self.clock),
            shared,
        );

        log::info!("Ingestion: starting capture for {}", self.config.source);
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let join = std::thread::spawn(move || {
            let first = capture.connect();
            capture.publish_status();
            let ok = first.is_ok();
            let _ = ready_tx.send(first);
            if ok {
                capture.run();
            } else {
                capture.shutdown();
            }
            let _ = done_tx.send(());
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(Worker {
                    stop,
                    done: done_rx,
                    join,
                });
                Ok(())
            }
            Ok(Err(err)) => {
                if join.join().is_err() {
                    log::error!("Ingestion: capture thread panicked");
                }
                Err(err)
            }
            Err(_) => {
                if join.join().is_err() {
                    log::error!("Ingestion: capture thread panicked");
                }
                Err(IngestError::ConnectionLost(
                    "capture thread exited before the first open".into(),
                ))
            }
        }
    }

    /// Latest frame, or `None` before the first frame and after `stop`.
    /// The same frame may be returned repeatedly; compare `sequence`.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.slot.latest()
    }

    pub fn health(&self) -> HealthReport {
        assess(
            &self.status.load(),
            self.slot.last_captured_at(),
            self.config.stale_threshold,
            self.clock.now(),
        )
    }

    /// Handle open and a frame within the stale threshold.
    pub fn is_streaming(&self) -> bool {
        let status = self.status.load();
        status.handle_open
            && matches!(
                status.state,
                ConnectionState::Open | ConnectionState::Connecting
            )
            && self.health().healthy
    }

    /// Frame rate estimated from the spacing of the last two frames.
    pub fn measured_fps(&self) -> Option<f64> {
        let gap = self.status.load().last_frame_gap?;
        let secs = gap.as_secs_f64();
        (secs > 0.0).then(|| 1.0 / secs)
    }

    /// Signal the capture thread, wait up to the shutdown timeout and clear the
    /// slot. Safe to call repeatedly and without a prior `start`.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
            match worker.done.recv_timeout(self.config.shutdown_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.join.join().is_err() {
                        log::error!("Ingestion: capture thread panicked");
                    }
                    log::info!("Ingestion: stopped {}", self.config.source);
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "Ingestion: capture thread for {} did not exit within {:.1}s; detaching",
                        self.config.source,
                        self.config.shutdown_timeout.as_secs_f64()
                    );
                }
            }
        }
        self.slot.clear();
    }
}

impl Drop for Ingestion {
    fn drop(&mut self) {
        self.stop();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
