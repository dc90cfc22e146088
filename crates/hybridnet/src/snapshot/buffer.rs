use glam::{Quat, Vec3};

use crate::config::InterpolationConfig;
use crate::protocol::packets::TransformDelta;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Transform {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn interpolate(&self, to: &Transform, t: f32) -> Transform {
        let position = self.position.lerp(to.position, t);

        let from_rot = self.rotation.normalize();
        let to_rot = to.rotation.normalize();
        let rotation = if from_rot.dot(to_rot) < 0.0 {
            from_rot.slerp(-to_rot, t)
        } else {
            from_rot.slerp(to_rot, t)
        };

        Transform {
            position,
            rotation: rotation.normalize(),
        }
    }

    pub fn merge(&self, delta: &TransformDelta) -> Transform {
        Transform {
            position: delta.position.unwrap_or(self.position),
            rotation: delta.rotation.unwrap_or(self.rotation),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformSnapshot {
    pub timestamp_ms: f64,
    pub transform: Transform,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolatedSample {
    pub transform: Transform,
    pub t: f32,
    pub from_ms: f64,
    pub extrapolated: bool,
}

pub fn inverse_lerp(from: f64, to: f64, value: f64) -> f64 {
    let span = to - from;
    if span.abs() <= f64::EPSILON {
        return 0.0;
    }
    (value - from) / span
}

#[derive(Debug)]
pub struct SnapshotBuffer {
    config: InterpolationConfig,
    snapshots: Vec<TransformSnapshot>,
    baseline: Transform,
    average_delay_ms: Option<f64>,
    send_interval_ms: f64,
    remote_tick_interval_ms: f64,
}

impl SnapshotBuffer {
    pub fn new(
        config: InterpolationConfig,
        baseline: Transform,
        send_interval_ms: f64,
        remote_tick_interval_ms: f64,
    ) -> Self {
        Self {
            config,
            snapshots: Vec::new(),
            baseline,
            average_delay_ms: None,
            send_interval_ms,
            remote_tick_interval_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn snapshots(&self) -> &[TransformSnapshot] {
        &self.snapshots
    }

    pub fn latest(&self) -> Option<&TransformSnapshot> {
        self.snapshots.last()
    }

    pub fn average_delay_ms(&self) -> f64 {
        self.average_delay_ms.unwrap_or(0.0)
    }

    pub fn insert_delta(&mut self, delta: &TransformDelta, server_now_ms: f64) -> bool {
        let base = self
            .latest()
            .map(|s| s.transform)
            .unwrap_or(self.baseline);

        self.insert(
            TransformSnapshot {
                timestamp_ms: delta.timestamp_ms,
                transform: base.merge(delta),
            },
            server_now_ms,
        )
    }

    pub fn insert(&mut self, snapshot: TransformSnapshot, server_now_ms: f64) -> bool {
        let index = self
            .snapshots
            .partition_point(|s| s.timestamp_ms < snapshot.timestamp_ms);

        if self
            .snapshots
            .get(index)
            .is_some_and(|s| s.timestamp_ms == snapshot.timestamp_ms)
        {
            log::debug!("duplicate snapshot at {:.2}ms ignored", snapshot.timestamp_ms);
            return false;
        }

        self.snapshots.insert(index, snapshot);

        if let Some(latest) = self.latest() {
            let sample = server_now_ms - latest.timestamp_ms;
            self.average_delay_ms = Some(match self.average_delay_ms {
                Some(average) => average + (sample - average) * self.config.delay_smoothing,
                None => sample,
            });
        }

        true
    }

    /// Deliberately in the past so that both bracketing snapshots have most
    /// likely arrived.
    pub fn render_time(&self, server_now_ms: f64) -> f64 {
        server_now_ms
            - (self.average_delay_ms()
                + self.send_interval_ms
                + self.remote_tick_interval_ms
                + self.config.buffer_delay_ms)
    }

    pub fn sample(&self, render_time_ms: f64) -> Option<InterpolatedSample> {
        let index = self
            .snapshots
            .partition_point(|s| s.timestamp_ms < render_time_ms);

        if index == 0 {
            return None;
        }
        let last = &self.snapshots[index - 1];

        if let Some(curr) = self.snapshots.get(index) {
            let t = inverse_lerp(last.timestamp_ms, curr.timestamp_ms, render_time_ms)
                .clamp(0.0, 1.0) as f32;
            return Some(InterpolatedSample {
                transform: last.transform.interpolate(&curr.transform, t),
                t,
                from_ms: last.timestamp_ms,
                extrapolated: false,
            });
        }

        if !self.config.allow_extrapolation || index < 2 {
            return None;
        }

        let prev = &self.snapshots[index - 2];
        let t = (inverse_lerp(prev.timestamp_ms, last.timestamp_ms, render_time_ms) as f32)
            .min(self.config.max_extrapolation);
        Some(InterpolatedSample {
            transform: prev.transform.interpolate(&last.transform, t),
            t,
            from_ms: prev.timestamp_ms,
            extrapolated: true,
        })
    }

    pub fn tick(&mut self, server_now_ms: f64) -> Option<InterpolatedSample> {
        let sample = self.sample(self.render_time(server_now_ms))?;
        self.prune_before(sample.from_ms);
        Some(sample)
    }

    pub fn prune_before(&mut self, timestamp_ms: f64) {
        self.snapshots.retain(|s| s.timestamp_ms >= timestamp_ms);
    }

    pub fn clear(&mut self, baseline: Transform) {
        self.snapshots.clear();
        self.baseline = baseline;
        self.average_delay_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> SnapshotBuffer {
        SnapshotBuffer::new(InterpolationConfig::default(), Transform::default(), 50.0, 16.0)
    }

    fn at(position: Vec3) -> Transform {
        Transform::new(position, Quat::IDENTITY)
    }

    fn snapshot(timestamp_ms: f64, position: Vec3) -> TransformSnapshot {
        TransformSnapshot {
            timestamp_ms,
            transform: at(position),
        }
    }

    #[test]
    fn midpoint_between_bracketing_snapshots() {
        let mut buffer = buffer();
        buffer.insert(snapshot(100.0, Vec3::ZERO), 100.0);
        buffer.insert(snapshot(200.0, Vec3::new(10.0, 20.0, -30.0)), 200.0);

        let sample = buffer.sample(150.0).unwrap();
        assert!((sample.t - 0.5).abs() < 1e-6);
        assert!((sample.transform.position - Vec3::new(5.0, 10.0, -15.0)).length() < 1e-5);
        assert!(!sample.extrapolated);
    }

    #[test]
    fn outside_bracket_is_not_served() {
        let mut buffer = buffer();
        buffer.insert(snapshot(100.0, Vec3::ZERO), 100.0);
        buffer.insert(snapshot(200.0, Vec3::X), 200.0);

        assert!(buffer.sample(99.0).is_none());
        assert!(buffer.sample(250.0).is_none());
    }

    #[test]
    fn extrapolation_when_enabled() {
        let mut buffer = SnapshotBuffer::new(
            InterpolationConfig {
                allow_extrapolation: true,
                max_extrapolation: 1.5,
                ..Default::default()
            },
            Transform::default(),
            50.0,
            16.0,
        );
        buffer.insert(snapshot(100.0, Vec3::ZERO), 100.0);
        buffer.insert(snapshot(200.0, Vec3::X * 10.0), 200.0);

        let sample = buffer.sample(250.0).unwrap();
        assert!(sample.extrapolated);
        assert!((sample.transform.position.x - 15.0).abs() < 1e-4);

        let capped = buffer.sample(1000.0).unwrap();
        assert!((capped.t - 1.5).abs() < 1e-6);
    }

    #[test]
    fn tick_prunes_older_than_last() {
        let mut buffer = buffer();
        for (i, ts) in [100.0, 150.0, 200.0, 250.0, 300.0].into_iter().enumerate() {
            buffer.insert(snapshot(ts, Vec3::X * i as f32), 300.0);
        }
        buffer.average_delay_ms = Some(0.0);

        // render time = 350 - (0 + 50 + 16 + 16) = 268
        let sample = buffer.tick(350.0).unwrap();
        assert_eq!(sample.from_ms, 250.0);
        assert!(buffer.snapshots().iter().all(|s| s.timestamp_ms >= sample.from_ms));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn out_of_order_insert_keeps_order_and_dedups() {
        let mut buffer = buffer();
        assert!(buffer.insert(snapshot(300.0, Vec3::Z), 310.0));
        assert!(buffer.insert(snapshot(100.0, Vec3::X), 310.0));
        assert!(buffer.insert(snapshot(200.0, Vec3::Y), 310.0));
        assert!(!buffer.insert(snapshot(200.0, Vec3::ONE), 310.0));

        let stamps: Vec<f64> = buffer.snapshots().iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![100.0, 200.0, 300.0]);
        assert_eq!(buffer.snapshots()[1].transform.position, Vec3::Y);
    }

    #[test]
    fn delta_fills_missing_fields_from_latest() {
        let mut buffer = buffer();
        let rotation = Quat::from_rotation_z(1.0);
        buffer.insert(
            TransformSnapshot {
                timestamp_ms: 100.0,
                transform: Transform::new(Vec3::X, rotation),
            },
            100.0,
        );

        buffer.insert_delta(
            &TransformDelta {
                entity_id: 1,
                timestamp_ms: 150.0,
                position: Some(Vec3::Y),
                rotation: None,
            },
            150.0,
        );

        let latest = buffer.latest().unwrap();
        assert_eq!(latest.transform.position, Vec3::Y);
        assert_eq!(latest.transform.rotation, rotation);
    }

    #[test]
    fn delay_average_is_smoothed() {
        let mut buffer = buffer();
        buffer.insert(snapshot(100.0, Vec3::ZERO), 140.0);
        assert_eq!(buffer.average_delay_ms(), 40.0);

        buffer.insert(snapshot(200.0, Vec3::ZERO), 340.0);
        // 40 + (140 - 40) * 0.1
        assert!((buffer.average_delay_ms() - 50.0).abs() < 1e-9);

        let expected = 1000.0 - (50.0 + 50.0 + 16.0 + 16.0);
        assert!((buffer.render_time(1000.0) - expected).abs() < 1e-9);
    }

    #[test]
    fn rotation_takes_short_arc() {
        let from = Transform::new(Vec3::ZERO, Quat::IDENTITY);
        let to = Transform::new(Vec3::ZERO, -Quat::from_rotation_y(std::f32::consts::FRAC_PI_2));

        let mid = from.interpolate(&to, 0.5);
        let expected = Quat::from_rotation_y(std::f32::consts::FRAC_PI_4);
        assert!(mid.rotation.dot(expected).abs() > 0.9999);
        assert!(mid.rotation.is_normalized());
    }
}
