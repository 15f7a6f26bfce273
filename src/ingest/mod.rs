//! Connection handles for camera sources.
//!
//! This module provides different backends behind one handle contract:
//! - Synthetic `stub://` streams (always available)
//! - HTTP MJPEG/JPEG cameras, e.g. phone "IP Webcam" apps (feature: ingest-http)
//! - RTSP streams via GStreamer (feature: rtsp-gstreamer)
//! - Local V4L2 devices addressed by index (feature: ingest-v4l2)
//! - Scripted sources for fault injection
//!
//! Every backend is responsible for:
//! - Applying the configured read timeout so `read_frame` never blocks unbounded
//! - Requesting depth-1 buffering from the transport
//! - Reporting decode failures separately from connection loss
//! - Making `close` idempotent

#[cfg(feature = "ingest-http")]
pub mod http;
pub mod normalize;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod scripted;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::time::Duration;

use crate::config::{SourceConfig, SourceId};
use crate::error::{ConnectionError, ReadError};
use crate::frame::RawFrame;

pub use scripted::{OpenStep, ScriptProbe, ScriptedConnector, Step};
pub use synthetic::SyntheticConnector;

/// An open connection to one source.
pub trait ConnectionHandle: Send {
    /// Read the next decoded frame. Blocks at most the configured read timeout.
    fn read_frame(&mut self) -> Result<RawFrame, ReadError>;

    /// Discard up to `max` frames already buffered by the transport.
    /// Returns how many were dropped.
    fn drain(&mut self, _max: usize) -> usize {
        0
    }

    /// Release the underlying resource. Calling it again is a no-op.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens connection handles for one logical source.
pub trait Connector: Send {
    /// Human-readable source label for logs.
    fn describe(&self) -> String;

    /// Open a fresh handle with the read timeout and buffer depth applied.
    fn open(&mut self, config: &SourceConfig)
        -> Result<Box<dyn ConnectionHandle>, ConnectionError>;
}

/// Pick the backend for a source identifier.
///
/// Unsupported schemes and backends compiled out are configuration errors.
pub fn connector_for(config: &SourceConfig) -> Result<Box<dyn Connector>, ConnectionError> {
    match &config.source {
        SourceId::Device(index) => device_connector(*index),
        SourceId::Uri(uri) => {
            let scheme = uri
                .split_once("://")
                .map(|(scheme, _)| scheme.to_ascii_lowercase())
                .ok_or_else(|| {
                    ConnectionError::Configuration(format!("source '{}' has no URI scheme", uri))
                })?;
            match scheme.as_str() {
                "stub" => Ok(Box::new(SyntheticConnector::new(uri.clone()))),
                "http" | "https" => http_connector(uri),
                "rtsp" | "rtsps" => rtsp_connector(uri),
                other => Err(ConnectionError::Configuration(format!(
                    "unsupported source scheme '{}'; expected stub, http(s), rtsp or a device index",
                    other
                ))),
            }
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
fn device_connector(index: u32) -> Result<Box<dyn Connector>, ConnectionError> {
    Ok(Box::new(v4l2::V4l2Connector::new(index)))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn device_connector(index: u32) -> Result<Box<dyn Connector>, ConnectionError> {
    Err(ConnectionError::Configuration(format!(
        "device {} requires the ingest-v4l2 feature",
        index
    )))
}

#[cfg(feature = "ingest-http")]
fn http_connector(uri: &str) -> Result<Box<dyn Connector>, ConnectionError> {
    Ok(Box::new(http::HttpConnector::new(uri)?))
}

#[cfg(not(feature = "ingest-http"))]
fn http_connector(uri: &str) -> Result<Box<dyn Connector>, ConnectionError> {
    Err(ConnectionError::Configuration(format!(
        "{} requires the ingest-http feature",
        uri
    )))
}

#[cfg(feature = "rtsp-gstreamer")]
fn rtsp_connector(uri: &str) -> Result<Box<dyn Connector>, ConnectionError> {
    Ok(Box::new(rtsp::RtspConnector::new(uri)))
}

#[cfg(not(feature = "rtsp-gstreamer"))]
fn rtsp_connector(uri: &str) -> Result<Box<dyn Connector>, ConnectionError> {
    Err(ConnectionError::Configuration(format!(
        "{} requires the rtsp-gstreamer feature",
        uri
    )))
}

/// Minimum spacing between frames for a requested rate.
pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}
