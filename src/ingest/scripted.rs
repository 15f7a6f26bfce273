//! Scripted source for fault injection.
//!
//! Reads and opens follow queued outcomes; once a queue runs dry the configured
//! fallback repeats. A shared `ScriptProbe` records what the capture loop did to
//! the connection so callers can assert on it from another thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::SourceConfig;
use crate::error::{ConnectionError, ReadError};
use crate::frame::RawFrame;

use super::{ConnectionHandle, Connector};

/// Outcome of one scripted `read_frame` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Deliver a frame at the scripted native size.
    Frame,
    /// Deliver a frame that fails to decode.
    Corrupt,
    /// Block for the read timeout, then time out.
    Stall,
    /// Report transport loss.
    Lost,
}

/// Outcome of one scripted `open` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OpenStep {
    Ok,
    Unavailable,
    Misconfigured,
}

/// Counters shared between a scripted connector and the test observing it.
#[derive(Debug, Default)]
pub struct ScriptProbe {
    open_calls: AtomicUsize,
    close_calls: AtomicUsize,
    live_handles: AtomicUsize,
    reads: AtomicUsize,
    drain_calls: AtomicUsize,
}

impl ScriptProbe {
    pub fn open_calls(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Handles opened and not yet closed.
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn drain_calls(&self) -> usize {
        self.drain_calls.load(Ordering::SeqCst)
    }
}

struct Script {
    reads: VecDeque<Step>,
    read_fallback: Step,
    opens: VecDeque<OpenStep>,
    open_fallback: OpenStep,
}

pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
    probe: Arc<ScriptProbe>,
    clock: Arc<dyn Clock>,
    read_cost: Duration,
    width: u32,
    height: u32,
}

impl ScriptedConnector {
    /// Every read succeeds unless steps are queued.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                reads: VecDeque::new(),
                read_fallback: Step::Frame,
                opens: VecDeque::new(),
                open_fallback: OpenStep::Ok,
            })),
            probe: Arc::new(ScriptProbe::default()),
            clock: Arc::new(SystemClock),
            read_cost: Duration::ZERO,
            width: 64,
            height: 48,
        }
    }

    /// Queue read outcomes, consumed in order across reconnections.
    pub fn with_reads(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.lock().reads.extend(steps);
        self
    }

    /// Outcome used once queued reads are exhausted.
    pub fn then_reads(self, step: Step) -> Self {
        self.lock().read_fallback = step;
        self
    }

    pub fn with_opens(self, steps: impl IntoIterator<Item = OpenStep>) -> Self {
        self.lock().opens.extend(steps);
        self
    }

    pub fn then_opens(self, step: OpenStep) -> Self {
        self.lock().open_fallback = step;
        self
    }

    /// Time source used for read costs and stalls.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Time each read takes on the connector's clock.
    pub fn with_read_cost(mut self, cost: Duration) -> Self {
        self.read_cost = cost;
        self
    }

    pub fn with_native_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn probe(&self) -> Arc<ScriptProbe> {
        Arc::clone(&self.probe)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for ScriptedConnector {
    fn describe(&self) -> String {
        "script://fault-injection".to_string()
    }

    fn open(
        &mut self,
        config: &SourceConfig,
    ) -> Result<Box<dyn ConnectionHandle>, ConnectionError> {
        self.probe.open_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut script = self.lock();
            let fallback = script.open_fallback.clone();
            script.opens.pop_front().unwrap_or(fallback)
        };
        match outcome {
            OpenStep::Ok => {
                self.probe.live_handles.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(ScriptedHandle {
                    script: Arc::clone(&self.script),
                    probe: Arc::clone(&self.probe),
                    clock: Arc::clone(&self.clock),
                    read_cost: self.read_cost,
                    read_timeout: config.read_timeout,
                    width: self.width,
                    height: self.height,
                    open: true,
                }))
            }
            OpenStep::Unavailable => Err(ConnectionError::Unavailable(
                "scripted source refused connection".into(),
            )),
            OpenStep::Misconfigured => Err(ConnectionError::Configuration(
                "scripted source rejected configuration".into(),
            )),
        }
    }
}

struct ScriptedHandle {
    script: Arc<Mutex<Script>>,
    probe: Arc<ScriptProbe>,
    clock: Arc<dyn Clock>,
    read_cost: Duration,
    read_timeout: Duration,
    width: u32,
    height: u32,
    open: bool,
}

impl ConnectionHandle for ScriptedHandle {
    fn read_frame(&mut self) -> Result<RawFrame, ReadError> {
        if !self.open {
            return Err(ReadError::ConnectionLost("scripted handle closed".into()));
        }
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            let fallback = script.read_fallback.clone();
            script.reads.pop_front().unwrap_or(fallback)
        };
        if !self.read_cost.is_zero() {
            self.clock.sleep(self.read_cost);
        }
        match step {
            Step::Frame => {
                let len = (self.width * self.height * 3) as usize;
                Ok(RawFrame::rgb(vec![128u8; len], self.width, self.height))
            }
            // Wrong length for the advertised size, rejected by normalization.
            Step::Corrupt => Ok(RawFrame::rgb(vec![0u8; 7], self.width, self.height)),
            Step::Stall => {
                self.clock.sleep(self.read_timeout);
                Err(ReadError::Timeout(self.read_timeout))
            }
            Step::Lost => Err(ReadError::ConnectionLost("scripted transport drop".into())),
        }
    }

    fn drain(&mut self, _max: usize) -> usize {
        self.probe.drain_calls.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.probe.close_calls.fetch_add(1, Ordering::SeqCst);
            self.probe.live_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.close();
    }
}
