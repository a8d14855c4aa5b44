use crate::time::TimeSource;
use core::time::Duration;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A clock that never goes backward.
///
/// The wall-clock time is sampled once at construction; every later reading
/// adds the elapsed monotonic time (`Instant`) to that anchor. NTP steps and
/// manual clock changes after startup therefore cannot make identifiers go
/// backward, at the cost of slowly drifting from the wall clock on very long
/// uptimes.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    start: Instant,
    anchor: Duration,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Anchors a new clock at the current wall-clock time.
    ///
    /// A system clock set before 1970 anchors at the Unix epoch itself.
    pub fn new() -> Self {
        let start = Instant::now();
        let anchor = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self { start, anchor }
    }
}

impl TimeSource for MonotonicClock {
    fn now(&self) -> Duration {
        self.anchor + self.start.elapsed()
    }
}

/// The raw system wall clock.
///
/// Unlike [`MonotonicClock`], this follows every adjustment made to the host
/// clock. The encoder tolerates backward steps by continuing on its last
/// time unit, but a clock set far back will exhaust sequences quickly.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_tracks_wall_clock() {
        let clock = MonotonicClock::new();
        let wall = SystemClock.now();
        let diff = clock.now().abs_diff(wall);
        assert!(diff < Duration::from_millis(50), "drifted by {diff:?}");
    }

    #[test]
    fn monotonic_clock_never_goes_backward() {
        let clock = MonotonicClock::new();
        let mut last = clock.now();
        for _ in 0..10_000 {
            let now = clock.now();
            assert!(now >= last);
            last = now;
        }
    }
}
