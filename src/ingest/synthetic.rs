//! Synthetic `stub://` source.
//!
//! Produces a moving test pattern at a fixed native resolution so the resize path
//! is exercised. Opening always succeeds.

use crate::config::SourceConfig;
use crate::error::{ConnectionError, ReadError};
use crate::frame::RawFrame;

use super::{ConnectionHandle, Connector};

const NATIVE_WIDTH: u32 = 640;
const NATIVE_HEIGHT: u32 = 480;

pub struct SyntheticConnector {
    uri: String,
    opens: u64,
}

impl SyntheticConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            opens: 0,
        }
    }
}

impl Connector for SyntheticConnector {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.uri)
    }

    fn open(
        &mut self,
        _config: &SourceConfig,
    ) -> Result<Box<dyn ConnectionHandle>, ConnectionError> {
        self.opens += 1;
        log::info!("SyntheticSource: connected to {} (open #{})", self.uri, self.opens);
        Ok(Box::new(SyntheticHandle {
            frame_count: 0,
            scene_state: 0,
            open: true,
        }))
    }
}

struct SyntheticHandle {
    frame_count: u64,
    /// Simulated scene state; changes every 50 frames.
    scene_state: u8,
    open: bool,
}

impl SyntheticHandle {
    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (NATIVE_WIDTH * NATIVE_HEIGHT * 3) as usize;

        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl ConnectionHandle for SyntheticHandle {
    fn read_frame(&mut self) -> Result<RawFrame, ReadError> {
        if !self.open {
            return Err(ReadError::ConnectionLost("synthetic source closed".into()));
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Ok(RawFrame::rgb(pixels, NATIVE_WIDTH, NATIVE_HEIGHT))
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
