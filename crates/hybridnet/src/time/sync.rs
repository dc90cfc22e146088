use std::collections::VecDeque;

use crate::config::ClockSyncConfig;

/// One ping/pong exchange: `t0` local send, `t1` remote receive, `t2` remote
/// send, `t3` local receive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    pub t0: f64,
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
}

impl ClockSample {
    pub fn new(t0: f64, t1: f64, t2: f64, t3: f64) -> Self {
        Self { t0, t1, t2, t3 }
    }

    pub fn offset(&self) -> f64 {
        ((self.t1 - self.t0) + (self.t2 - self.t3)) / 2.0
    }

    pub fn delay(&self) -> f64 {
        (self.t3 - self.t0) - (self.t2 - self.t1)
    }
}

#[derive(Debug, Clone, Copy)]
struct Measurement {
    offset: f64,
    delay: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockUpdate {
    First(f64),
    Adjusted { from: f64, to: f64 },
    BelowNoiseFloor,
}

/// Estimates `server_time - local_time` from round-trip samples.
#[derive(Debug)]
pub struct ClockSync {
    config: ClockSyncConfig,
    samples: VecDeque<Measurement>,
    accumulator: f64,
    offset: Option<f64>,
    last_delay: Option<f64>,
}

impl ClockSync {
    pub fn new(config: ClockSyncConfig) -> Self {
        Self {
            samples: VecDeque::with_capacity(config.capacity),
            config,
            accumulator: 0.0,
            offset: None,
            last_delay: None,
        }
    }

    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    pub fn has_estimate(&self) -> bool {
        self.offset.is_some()
    }

    pub fn last_delay(&self) -> Option<f64> {
        self.last_delay
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn add_sample(&mut self, sample: ClockSample) -> ClockUpdate {
        let measurement = Measurement {
            offset: sample.offset(),
            delay: sample.delay(),
        };
        self.last_delay = Some(measurement.delay);

        while self.samples.len() >= self.config.capacity.max(1) {
            self.samples.pop_front();
        }
        self.samples.push_back(measurement);

        let median = self.filtered_median();

        let Some(current) = self.offset else {
            self.accumulator = median;
            self.offset = Some(median);
            log::debug!("clock offset established at {:.2}ms", median);
            return ClockUpdate::First(median);
        };

        if (median - current).abs() < self.config.noise_floor_ms {
            return ClockUpdate::BelowNoiseFloor;
        }

        self.accumulator += (median - self.accumulator) * self.config.smoothing;
        let step = (self.accumulator - current)
            .clamp(-self.config.max_jump_ms, self.config.max_jump_ms);
        let next = current + step;
        self.offset = Some(next);

        log::trace!(
            "clock offset {:.2}ms -> {:.2}ms (median {:.2}ms)",
            current,
            next,
            median
        );
        ClockUpdate::Adjusted {
            from: current,
            to: next,
        }
    }

    fn filtered_median(&self) -> f64 {
        let mut by_delay: Vec<Measurement> = self.samples.iter().copied().collect();
        by_delay.sort_by(|a, b| a.delay.total_cmp(&b.delay));

        let keep = ((by_delay.len() as f64 * self.config.low_delay_fraction) as usize)
            .clamp(1, by_delay.len());
        let mut offsets: Vec<f64> = by_delay[..keep].iter().map(|m| m.offset).collect();
        offsets.sort_by(|a, b| a.total_cmp(b));

        let mid = offsets.len() / 2;
        if offsets.len() % 2 == 0 {
            (offsets[mid - 1] + offsets[mid]) / 2.0
        } else {
            offsets[mid]
        }
    }

    pub fn server_time(&self, local_ms: f64) -> f64 {
        match self.offset {
            Some(offset) => local_ms + offset,
            None => local_ms,
        }
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.accumulator = 0.0;
        self.offset = None;
        self.last_delay = None;
    }
}
