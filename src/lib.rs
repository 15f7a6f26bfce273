//! Guardian ingest
//!
//! Resilient single-frame camera ingestion for the guardian detection
//! pipeline. One background capture loop per source keeps exactly one recent
//! frame available, recovers from transport failures and reports health.
//!
//! # Module Structure
//!
//! - `ingest`: Connection handles (synthetic, scripted, HTTP MJPEG, RTSP, V4L2)
//! - `frame`: Raw and published frames, the single-frame slot
//! - `supervisor`: Connection state machine and recovery counters
//! - `capture`: The background capture loop
//! - `health`: Health reports derived from published state
//! - `facade`: `Ingestion`, the consumer-facing API
//! - `stability`: Stream stability measurement for `stream_check`
//! - `config`: Source configuration and the daemon config loader
//!
//! # Example
//!
//! ```no_run
//! use guardian_ingest::{Ingestion, SourceConfig, SourceId};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = SourceConfig::new(SourceId::parse("rtsp://10.0.0.2/stream")?);
//! let mut ingestion = Ingestion::new(config);
//! ingestion.start()?;
//! if let Some(frame) = ingestion.latest_frame() {
//!     println!("frame {} ({}x{})", frame.sequence, frame.width, frame.height);
//! }
//! println!("{}", ingestion.health());
//! ingestion.stop();
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
pub mod frame;
pub mod health;
pub mod ingest;
pub mod stability;
pub mod supervisor;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{parse_resolution, ConsumerSettings, GuardianConfig, SourceConfig, SourceId};
pub use error::{ConnectionError, IngestError, ReadError};
pub use facade::Ingestion;
pub use frame::{Frame, FrameSlot, RawFrame};
pub use health::HealthReport;
pub use ingest::{connector_for, ConnectionHandle, Connector};
pub use stability::{StabilityMonitor, StabilityReport, Verdict};
pub use supervisor::{ConnectionState, RecoveryCounters};
