use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_dispatched: u64,
    pub messages_dropped: u64,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_dispatch(&mut self, dispatched: usize, dropped: usize) {
        self.messages_dispatched += dispatched as u64;
        self.messages_dropped += dropped as u64;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConditions {
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl LinkConditions {
    pub fn should_drop(&self, rng: &mut fastrand::Rng) -> bool {
        if self.loss_percent <= 0.0 {
            return false;
        }
        rng.f32() * 100.0 < self.loss_percent
    }

    pub fn delay_ms(&self, rng: &mut fastrand::Rng) -> f64 {
        if self.max_latency_ms == 0 && self.jitter_ms == 0 {
            return 0.0;
        }
        let base = self.min_latency_ms as f64;
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms) as f64;
        let jitter = if self.jitter_ms > 0 {
            rng.f64() * self.jitter_ms as f64
        } else {
            0.0
        };
        base + rng.f64() * range + jitter
    }
}
