//! Frames and the single-frame slot.
//!
//! - `RawFrame`: what a connection handle hands back from `read_frame`, before resize.
//! - `Frame`: an immutable, published frame with a sequence number and capture time.
//! - `FrameSlot`: arena-of-one. The capture loop swaps in a new `Arc<Frame>`;
//!   readers load the current pointer without taking a lock.

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use crate::ingest::normalize::PixelFormat;

// ----------------------------------------------------------------------------
// RawFrame: backend output
// ----------------------------------------------------------------------------

/// Decoded pixels straight from a connection handle.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub(crate) data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
        }
    }

    /// Tightly packed RGB24 frame.
    pub fn rgb(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self::new(data, width, height, PixelFormat::Rgb24)
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

// ----------------------------------------------------------------------------
// Frame: published, immutable
// ----------------------------------------------------------------------------

/// A published frame. Immutable once it is in the slot.
#[derive(Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Strictly increasing per ingestion instance, starting at 1.
    pub sequence: u64,
    /// Monotonic capture instant (staleness checks).
    pub captured_at: Instant,
    /// Wall-clock capture time (for downstream logging only).
    pub captured_wall: SystemTime,
}

impl Frame {
    /// RGB24 pixels, `width * height * 3` bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Age of this frame relative to `now`.
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }
}

// ----------------------------------------------------------------------------
// FrameSlot
// ----------------------------------------------------------------------------

/// Single-writer, many-reader slot holding at most one frame.
///
/// Publishing replaces the previous frame atomically. A reader either gets
/// `None` or a complete `Arc<Frame>`; older frames stay alive only for readers
/// that already hold them.
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: ArcSwapOption<Frame>,
    next_sequence: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish RGB pixels as the newest frame and return it.
    pub(crate) fn publish(
        &self,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: Instant,
        captured_wall: SystemTime,
    ) -> Arc<Frame> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let frame = Arc::new(Frame {
            pixels,
            width,
            height,
            sequence,
            captured_at,
            captured_wall,
        });
        self.current.store(Some(Arc::clone(&frame)));
        frame
    }

    /// Latest published frame, if any. Never blocks.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.current.load_full()
    }

    /// Capture instant of the latest frame.
    pub fn last_captured_at(&self) -> Option<Instant> {
        (*self.current.load())
            .as_ref()
            .map(|frame| frame.captured_at)
    }

    /// Drop the held frame. Sequence numbers keep increasing afterwards.
    pub fn clear(&self) {
        self.current.store(None);
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
