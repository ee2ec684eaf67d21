use std::time::Duration;

/// What one streaming tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamStats {
    /// False when the camera had not moved far enough to re-evaluate nodes.
    pub evaluated: bool,
    pub loads_started: usize,
    pub loads_completed: usize,
    pub load_failures: usize,
    pub evicted: usize,
    pub visibility_changes: usize,
    /// Loads that landed for a node the camera had already left.
    pub loads_discarded: usize,
    /// Attached nodes outside the camera frustum after this tick.
    pub culled: usize,
    pub cull_changes: usize,
    pub resident: usize,
    pub in_flight: usize,
    pub tick_time: Duration,
}

/// Ring buffer of recent tick durations.
#[derive(Debug)]
pub struct FrameTimer {
    history: Vec<Duration>,
    index: usize,
    filled: bool,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: vec![Duration::ZERO; capacity.max(1)],
            index: 0,
            filled: false,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        self.history[self.index] = dt;
        self.index = (self.index + 1) % self.history.len();
        if self.index == 0 {
            self.filled = true;
        }
    }

    fn window(&self) -> &[Duration] {
        if self.filled {
            &self.history
        } else {
            &self.history[..self.index]
        }
    }

    pub fn average(&self) -> Duration {
        let w = self.window();
        if w.is_empty() {
            return Duration::ZERO;
        }
        w.iter().sum::<Duration>() / w.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.window().iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn count(&self) -> usize {
        self.window().len()
    }
}
