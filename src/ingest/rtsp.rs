//! RTSP frame source via GStreamer.
//!
//! Pipeline: `rtspsrc latency=0 ! decodebin ! videoconvert ! RGB appsink`. The
//! appsink keeps one buffer and drops older ones, which is the depth-1 request;
//! `try_pull_sample` bounds every read by the configured timeout.

use anyhow::Context;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::error::{ConnectionError, ReadError};
use crate::frame::RawFrame;

use super::{ConnectionHandle, Connector};

pub struct RtspConnector {
    url: String,
}

impl RtspConnector {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

impl Connector for RtspConnector {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn open(
        &mut self,
        config: &SourceConfig,
    ) -> Result<Box<dyn ConnectionHandle>, ConnectionError> {
        let handle = GstreamerHandle::open(&self.url, config)
            .map_err(|e| ConnectionError::Unavailable(format!("{:#}", e)))?;
        log::info!("RtspSource: connected to {}", self.url);
        Ok(Box::new(handle))
    }
}

struct GstreamerHandle {
    url: String,
    pipeline: Option<gstreamer::Pipeline>,
    appsink: gstreamer_app::AppSink,
    read_timeout: Duration,
}

impl GstreamerHandle {
    fn open(url: &str, config: &SourceConfig) -> anyhow::Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let timeout_us = config.read_timeout.as_micros();
        let pipeline_description = format!(
            "rtspsrc location={} latency=0 timeout={} ! decodebin ! videoconvert ! \
             video/x-raw,format=RGB ! appsink name=appsink sync=false max-buffers={} drop=true",
            url, timeout_us, config.buffer_depth
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(config.buffer_depth as u32);
        appsink.set_drop(true);
        appsink.set_sync(false);

        pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;

        Ok(Self {
            url: url.to_string(),
            pipeline: Some(pipeline),
            appsink,
            read_timeout: config.read_timeout,
        })
    }

    /// Surface bus errors and end-of-stream as connection loss.
    fn poll_bus(&self) -> Result<(), ReadError> {
        let Some(bus) = self.pipeline.as_ref().and_then(|p| p.bus()) else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(ReadError::ConnectionLost(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    )));
                }
                MessageView::Eos(..) => {
                    return Err(ReadError::ConnectionLost("gstreamer reached EOS".into()));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl ConnectionHandle for GstreamerHandle {
    fn read_frame(&mut self) -> Result<RawFrame, ReadError> {
        if self.pipeline.is_none() {
            return Err(ReadError::ConnectionLost("rtsp source closed".into()));
        }
        self.poll_bus()?;

        let timeout = gstreamer::ClockTime::from_nseconds(self.read_timeout.as_nanos() as u64);
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .ok_or(ReadError::Timeout(self.read_timeout))?;

        let (pixels, width, height) =
            sample_to_pixels(&sample).map_err(|e| ReadError::Decode(format!("{:#}", e)))?;
        Ok(RawFrame::rgb(pixels, width, height))
    }

    fn drain(&mut self, max: usize) -> usize {
        let mut dropped = 0;
        while dropped < max {
            if self
                .appsink
                .try_pull_sample(gstreamer::ClockTime::ZERO)
                .is_none()
            {
                break;
            }
            dropped += 1;
        }
        dropped
    }

    fn close(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(err) = pipeline.set_state(gstreamer::State::Null) {
                log::warn!("RtspSource: failed to stop pipeline for {}: {}", self.url, err);
            }
            log::info!("RtspSource: closed {}", self.url);
        }
    }

    fn is_open(&self) -> bool {
        self.pipeline.is_some()
    }
}

impl Drop for GstreamerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> anyhow::Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
