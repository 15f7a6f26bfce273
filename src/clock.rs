//! Time source for the capture loop and health queries.
//!
//! The loop never calls `Instant::now()`, `SystemTime::now()` or `thread::sleep`
//! directly; it goes through a `Clock` so recovery timing can be driven
//! deterministically.

use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

/// Monotonic time reference shared by the capture loop and the facade.
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Current wall-clock time, used only to stamp published frames.
    fn wall_now(&self) -> SystemTime {
        SystemTime::now()
    }

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock backed implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually advanced clock. `sleep` advances time instead of blocking.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: SystemTime,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: SystemTime::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += duration;
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall_now(&self) -> SystemTime {
        self.wall_origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_sleep_advances_time() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_secs(300));
        assert_eq!(clock.now() - start, Duration::from_secs(300));
        assert_eq!(clock.elapsed(), Duration::from_secs(300));
    }

    #[test]
    fn manual_clock_wall_time_follows_sleep() {
        let clock = ManualClock::new();
        let before = clock.wall_now();
        clock.sleep(Duration::from_secs(90));
        assert_eq!(
            clock.wall_now().duration_since(before).ok(),
            Some(Duration::from_secs(90))
        );
    }
}
