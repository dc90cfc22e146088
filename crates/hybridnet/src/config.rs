use serde::{Deserialize, Serialize};

use crate::error::{NetError, NetResult};

pub const DEFAULT_MAX_BUFFER_SIZE: usize = 65535;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1500;
pub const DEFAULT_TICK_RATE: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthorityMode {
    #[default]
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisconnectPolicy {
    #[default]
    Despawn,
    Unown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockSyncConfig {
    pub capacity: usize,
    pub low_delay_fraction: f64,
    pub smoothing: f64,
    pub noise_floor_ms: f64,
    pub max_jump_ms: f64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            capacity: 32,
            low_delay_fraction: 0.2,
            smoothing: 0.1,
            noise_floor_ms: 1.0,
            max_jump_ms: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    pub buffer_delay_ms: f64,
    pub delay_smoothing: f64,
    pub allow_extrapolation: bool,
    pub max_extrapolation: f32,
    pub position_threshold: f32,
    pub rotation_threshold: f32,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            buffer_delay_ms: 16.0,
            delay_smoothing: 0.1,
            allow_extrapolation: false,
            max_extrapolation: 1.5,
            position_threshold: 0.001,
            rotation_threshold: 0.0001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub max_buffer_size: usize,
    pub max_batch_size: usize,
    pub max_pooled_buffers: usize,
    pub max_connections: usize,
    pub connection_timeout_ms: f64,
    pub tick_rate: u32,
    pub send_interval_ms: f64,
    pub ping_interval_ms: f64,
    pub authority_mode: AuthorityMode,
    pub disconnect_policy: DisconnectPolicy,
    pub player_prefab: Option<String>,
    pub clock: ClockSyncConfig,
    pub interpolation: InterpolationConfig,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_pooled_buffers: 64,
            max_connections: 64,
            connection_timeout_ms: 120_000.0,
            tick_rate: DEFAULT_TICK_RATE,
            send_interval_ms: 50.0,
            ping_interval_ms: 1000.0,
            authority_mode: AuthorityMode::Server,
            disconnect_policy: DisconnectPolicy::Despawn,
            player_prefab: None,
            clock: ClockSyncConfig::default(),
            interpolation: InterpolationConfig::default(),
        }
    }
}

impl NetConfig {
    pub fn tick_interval_ms(&self) -> f64 {
        1000.0 / self.tick_rate.max(1) as f64
    }

    pub fn validate(&self) -> NetResult<()> {
        let fail = |message: String| Err(NetError::InvalidConfig(message));

        if self.max_batch_size <= 1 {
            return fail(format!(
                "max_batch_size must exceed 1, got {}",
                self.max_batch_size
            ));
        }
        if self.max_batch_size > self.max_buffer_size {
            return fail(format!(
                "max_batch_size {} exceeds max_buffer_size {}",
                self.max_batch_size, self.max_buffer_size
            ));
        }

        let clock = &self.clock;
        if clock.capacity == 0 {
            return fail("clock.capacity must be at least 1".into());
        }
        if !(clock.low_delay_fraction > 0.0 && clock.low_delay_fraction <= 1.0) {
            return fail(format!(
                "clock.low_delay_fraction must be in (0, 1], got {}",
                clock.low_delay_fraction
            ));
        }
        if !(clock.smoothing > 0.0 && clock.smoothing <= 1.0) {
            return fail(format!(
                "clock.smoothing must be in (0, 1], got {}",
                clock.smoothing
            ));
        }
        if !(clock.max_jump_ms > 0.0) {
            return fail(format!(
                "clock.max_jump_ms must be positive, got {}",
                clock.max_jump_ms
            ));
        }
        Ok(())
    }
}
