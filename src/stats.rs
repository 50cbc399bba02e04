//! Frame timing - rolling FPS and frame duration for diagnostics

/// Rolling window of frame timestamps (ms)
pub struct FrameStats {
    frames: Vec<f64>,
    window: usize,
}

impl FrameStats {
    pub fn new(window: usize) -> Self {
        Self {
            frames: Vec::with_capacity(window),
            window: window.max(2),
        }
    }

    /// Record a frame at host time `now` (ms)
    pub fn tick(&mut self, now: f64) {
        self.frames.push(now);
        if self.frames.len() > self.window {
            self.frames.remove(0);
        }
    }

    pub fn fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.frames.first(), self.frames.last()) else {
            return 0.0;
        };
        let elapsed = last - first;
        if self.frames.len() < 2 || elapsed <= 0.0 {
            return 0.0;
        }
        (self.frames.len() as f64 - 1.0) / (elapsed / 1000.0)
    }

    /// Seconds since the previous frame, 0 on the first
    pub fn last_delta_secs(&self) -> f32 {
        match self.frames.as_slice() {
            [.., prev, last] => ((last - prev) / 1000.0) as f32,
            _ => 0.0,
        }
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new(60)
    }
}
