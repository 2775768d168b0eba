//! Application Timing
//!
//! Monotonic clock helpers used by the kernel accumulator, the task pool
//! idle backoff, and the frame-rate limiter. All engine-internal timing is in
//! microseconds.

use std::time::{Duration, Instant};

/// Microseconds in one second.
pub const US_PER_SECOND: u64 = 1_000_000;

/// Timer for tracking frame timing and elapsed time.
pub struct Timer {
    start_time: Instant,
    last_update: Instant,
    /// Time since last tick
    pub delta: Duration,
    /// Total elapsed time since creation
    pub elapsed: Duration,
    /// Total number of ticks
    pub frame_count: u64,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Creates a new timer starting from now.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start_time: now,
            last_update: now,
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
            frame_count: 0,
        }
    }

    /// Updates the timer (called by the kernel once per frame).
    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last_update;
        self.elapsed = now - self.start_time;
        self.last_update = now;
        self.frame_count += 1;
    }

    /// Delta since the previous tick, in microseconds.
    #[must_use]
    pub fn delta_us(&self) -> u64 {
        self.delta.as_micros() as u64
    }

    /// Total elapsed time, in microseconds.
    #[must_use]
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed.as_micros() as u64
    }

    #[must_use]
    pub fn dt_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }
}

/// Sleeps away the remainder of the frame budget when a frame-rate cap is
/// configured and vsync is off.
pub struct FrameRateLimiter {
    frame_budget: Option<Duration>,
    frame_start: Instant,
}

impl FrameRateLimiter {
    /// `limit_fps == 0` disables the limiter.
    #[must_use]
    pub fn new(limit_fps: u32) -> Self {
        let frame_budget = (limit_fps > 0)
            .then(|| Duration::from_micros(US_PER_SECOND / u64::from(limit_fps)));
        Self {
            frame_budget,
            frame_start: Instant::now(),
        }
    }

    /// Marks the start of a frame.
    pub fn frame_started(&mut self) {
        self.frame_start = Instant::now();
    }

    /// Blocks until the frame budget is spent. No-op when uncapped.
    pub fn wait_for_budget(&self) {
        let Some(budget) = self.frame_budget else {
            return;
        };
        let spent = self.frame_start.elapsed();
        if spent < budget {
            std::thread::sleep(budget - spent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_advances() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(2));
        timer.tick();
        assert!(timer.delta_us() >= 1_000);
        assert_eq!(timer.frame_count, 1);
    }

    #[test]
    fn uncapped_limiter_is_noop() {
        let mut limiter = FrameRateLimiter::new(0);
        limiter.frame_started();
        let t0 = Instant::now();
        limiter.wait_for_budget();
        assert!(t0.elapsed() < Duration::from_millis(5));
    }
}
