//! V4L2 frame source for local capture devices.
//!
//! Device index `n` maps to `/dev/video{n}`. The handle asks for RGB3 at the
//! configured size and falls back to NV12 or whatever format the driver keeps;
//! normalization takes care of the rest.

use anyhow::Context;
use ouroboros::self_referencing;
use std::io::ErrorKind;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::error::{ConnectionError, ReadError};
use crate::frame::RawFrame;

use super::normalize::PixelFormat;
use super::{ConnectionHandle, Connector};

pub struct V4l2Connector {
    device_path: String,
}

impl V4l2Connector {
    pub fn new(index: u32) -> Self {
        Self {
            device_path: format!("/dev/video{}", index),
        }
    }
}

impl Connector for V4l2Connector {
    fn describe(&self) -> String {
        self.device_path.clone()
    }

    fn open(
        &mut self,
        config: &SourceConfig,
    ) -> Result<Box<dyn ConnectionHandle>, ConnectionError> {
        let handle = V4l2Handle::open(&self.device_path, config)
            .map_err(|e| ConnectionError::Unavailable(format!("{:#}", e)))?;
        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.device_path,
            handle.width,
            handle.height,
            handle.format
        );
        Ok(Box::new(handle))
    }
}

#[self_referencing]
struct DeviceStream {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct V4l2Handle {
    device_path: String,
    state: Option<DeviceStream>,
    width: u32,
    height: u32,
    format: PixelFormat,
    read_timeout: Duration,
}

impl V4l2Handle {
    fn open(device_path: &str, config: &SourceConfig) -> anyhow::Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(device_path)
            .with_context(|| format!("open v4l2 device {}", device_path))?;
        let mut requested = device.format().context("read v4l2 format")?;
        requested.width = config.width;
        requested.height = config.height;
        requested.fourcc = v4l::FourCC::new(b"RGB3");

        let active = match device.set_format(&requested) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let format = pixel_format_for(&active.fourcc.repr).with_context(|| {
            format!(
                "{} delivers unsupported pixel format {}",
                device_path, active.fourcc
            )
        })?;

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", device_path, err);
            }
        }

        let buffers = config.buffer_depth as u32;
        let read_timeout = config.read_timeout;
        let state = DeviceStreamTryBuilder {
            device,
            stream_builder: |device| {
                let mut stream =
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, buffers)
                        .context("create v4l2 buffer stream")?;
                stream.set_timeout(read_timeout);
                Ok::<_, anyhow::Error>(stream)
            },
        }
        .try_build()?;

        Ok(Self {
            device_path: device_path.to_string(),
            state: Some(state),
            width: active.width,
            height: active.height,
            format,
            read_timeout,
        })
    }
}

fn pixel_format_for(fourcc: &[u8; 4]) -> Option<PixelFormat> {
    match fourcc {
        b"RGB3" => Some(PixelFormat::Rgb24),
        b"NV12" => Some(PixelFormat::Nv12),
        _ => None,
    }
}

/// The part of a mapped buffer the driver actually wrote. Drivers may pad
/// buffers past the image; a zero or oversized count falls back to the whole buffer.
fn filled_bytes(buf: &[u8], bytesused: u32) -> &[u8] {
    match bytesused as usize {
        0 => buf,
        used => &buf[..used.min(buf.len())],
    }
}

impl ConnectionHandle for V4l2Handle {
    fn read_frame(&mut self) -> Result<RawFrame, ReadError> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| ReadError::ConnectionLost("v4l2 device closed".into()))?;
        let data = state
            .with_stream_mut(|stream| stream.next().map(|(buf, meta)| filled_bytes(buf, meta.bytesused).to_vec()))
            .map_err(|err| match err.kind() {
                ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                    ReadError::Timeout(self.read_timeout)
                }
                _ => ReadError::ConnectionLost(format!(
                    "capture from {}: {}",
                    self.device_path, err
                )),
            })?;

        Ok(RawFrame::new(data, self.width, self.height, self.format))
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: closed {}", self.device_path);
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_index_maps_to_dev_node() {
        assert_eq!(V4l2Connector::new(2).describe(), "/dev/video2");
    }

    #[test]
    fn only_rgb_and_nv12_are_accepted() {
        assert_eq!(pixel_format_for(b"RGB3"), Some(PixelFormat::Rgb24));
        assert_eq!(pixel_format_for(b"NV12"), Some(PixelFormat::Nv12));
        assert_eq!(pixel_format_for(b"MJPG"), None);
    }

    #[test]
    fn padded_buffers_are_cut_to_bytes_used() {
        let buf = vec![7u8; 32];
        assert_eq!(filled_bytes(&buf, 24).len(), 24);
        assert_eq!(filled_bytes(&buf, 0).len(), 32);
        assert_eq!(filled_bytes(&buf, 64).len(), 32);
    }

    #[test]
    fn missing_device_is_unavailable() {
        let mut connector = V4l2Connector::new(250);
        let err = connector.open(&SourceConfig::default()).err();
        assert!(matches!(err, Some(ConnectionError::Unavailable(_))));
    }
}
