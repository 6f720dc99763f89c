//! Time sources for tempo synchronization and note firing times.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Trait representing a monotonic time source.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

/// Default time source backed by `Instant::now`.
#[derive(Default)]
pub struct SystemTimeSource {
    _unit: (),
}

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Deterministic time source for tests and offline rendering.
///
/// Time only moves when `advance` is called, so it can be kept in lockstep
/// with a simulated device.
pub struct ManualTimeSource {
    now: Mutex<Instant>,
}

impl ManualTimeSource {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|err| err.into_inner());
        *now += by;
    }

    /// Advance by the wall time `frames` take at `sample_rate`
    pub fn advance_frames(&self, frames: usize, sample_rate: u32) {
        self.advance(Duration::from_secs_f64(frames as f64 / sample_rate as f64));
    }
}

impl Default for ManualTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_only_moves_when_advanced() {
        let start = Instant::now();
        let clock = ManualTimeSource::starting_at(start);
        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now(), start + Duration::from_millis(250));

        clock.advance_frames(24000, 48000);
        assert_eq!(clock.now(), start + Duration::from_millis(750));
    }

    #[test]
    fn test_system_time_is_monotonic() {
        let clock = SystemTimeSource::default();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
