//! Frame-time statistics.

use std::time::{Duration, Instant};

const HISTORY_LEN: usize = 120;

/// Rolling frame-time profile: FPS plus average/min/max frame time over the
/// last [`HISTORY_LEN`] frames.
pub struct FrameProfile {
    last_update: Instant,
    frame_count: u32,
    accumulated_time: Duration,
    history: [f32; HISTORY_LEN],
    cursor: usize,
    filled: usize,
    pub current_fps: f32,
}

impl Default for FrameProfile {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProfile {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frame_count: 0,
            accumulated_time: Duration::new(0, 0),
            history: [0.0; HISTORY_LEN],
            cursor: 0,
            filled: 0,
            current_fps: 0.0,
        }
    }

    /// Records one frame. Returns the refreshed FPS once per second.
    pub fn update(&mut self) -> Option<f32> {
        self.frame_count += 1;
        let now = Instant::now();
        let delta = now - self.last_update;
        self.last_update = now;
        self.accumulated_time += delta;

        let ms = delta.as_secs_f32() * 1000.0;
        self.history[self.cursor] = ms;
        self.cursor = (self.cursor + 1) % HISTORY_LEN;
        self.filled = (self.filled + 1).min(HISTORY_LEN);

        if self.accumulated_time.as_secs_f32() >= 1.0 {
            self.current_fps = self.frame_count as f32 / self.accumulated_time.as_secs_f32();
            self.accumulated_time = Duration::new(0, 0);
            self.frame_count = 0;
            return Some(self.current_fps);
        }
        None
    }

    /// Average frame time in milliseconds over the recorded window.
    #[must_use]
    pub fn average_ms(&self) -> f32 {
        if self.filled == 0 {
            return 0.0;
        }
        self.history[..self.filled].iter().sum::<f32>() / self.filled as f32
    }

    /// `(min, max)` frame time in milliseconds over the recorded window.
    #[must_use]
    pub fn min_max_ms(&self) -> (f32, f32) {
        if self.filled == 0 {
            return (0.0, 0.0);
        }
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for &ms in &self.history[..self.filled] {
            min = min.min(ms);
            max = max.max(ms);
        }
        (min, max)
    }
}
