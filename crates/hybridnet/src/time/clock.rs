use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

pub trait Clock {
    fn now_ms(&self) -> f64;
}

#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

/// Manually advanced clock. Clones share the same time base; `skewed` returns
/// a handle that reads the shared time plus a fixed offset.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Rc<Cell<f64>>,
    skew_ms: f64,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now_ms: Rc::new(Cell::new(start_ms)),
            skew_ms: 0.0,
        }
    }

    pub fn skewed(&self, skew_ms: f64) -> Self {
        Self {
            now_ms: Rc::clone(&self.now_ms),
            skew_ms: self.skew_ms + skew_ms,
        }
    }

    pub fn advance(&self, delta_ms: f64) {
        self.now_ms.set(self.now_ms.get() + delta_ms);
    }

    pub fn set(&self, now_ms: f64) {
        self.now_ms.set(now_ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now_ms.get() + self.skew_ms
    }
}
