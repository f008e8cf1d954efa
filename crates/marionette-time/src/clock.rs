//! Clocks for the playback engine

use std::time::{Duration, Instant};

use marionette_core::MotionTime;

/// Local time driven by explicit frame deltas
///
/// INVARIANT: never moves backwards.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalClock {
    value: MotionTime,
}

impl LocalClock {
    pub fn new() -> Self {
        LocalClock {
            value: MotionTime::ZERO,
        }
    }

    pub fn starting_at(value: MotionTime) -> Self {
        LocalClock { value }
    }

    /// Advance by `dt` seconds; returns the new time
    pub fn advance(&mut self, dt: f64) -> MotionTime {
        self.value = self.value.advance_secs(dt);
        self.value
    }

    #[inline]
    pub fn now(&self) -> MotionTime {
        self.value
    }
}

/// Frame delta source backed by the OS monotonic clock
pub struct FrameClock {
    last: Instant,
    max_step: Duration,
}

impl FrameClock {
    /// Clamp for a single step (e.g. after the process was suspended)
    pub const DEFAULT_MAX_STEP: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        Self::with_max_step(Self::DEFAULT_MAX_STEP)
    }

    pub fn with_max_step(max_step: Duration) -> Self {
        FrameClock {
            last: Instant::now(),
            max_step,
        }
    }

    /// Elapsed time since the previous call, clamped to `max_step`
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        elapsed.min(self.max_step)
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_clock_monotonic() {
        let mut clock = LocalClock::new();
        clock.advance(0.5);
        let before = clock.now();
        clock.advance(-1.0);
        assert_eq!(clock.now(), before);
        assert_eq!(clock.advance(0.25), MotionTime::from_millis(750));
    }

    #[test]
    fn test_frame_clock_clamped() {
        let mut clock = FrameClock::with_max_step(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));
        assert!(clock.tick() <= Duration::from_millis(5));
    }
}
