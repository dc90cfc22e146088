use crate::config::NetConfig;
use crate::protocol::packets::TransformDelta;

use super::buffer::{SnapshotBuffer, Transform};

#[derive(Debug)]
pub struct TransformSync {
    transform: Transform,
    last_sent: Transform,
    next_send_ms: f64,
    idle_pending: bool,
    send_interval_ms: f64,
    position_threshold: f32,
    rotation_threshold: f32,
    buffer: SnapshotBuffer,
}

impl TransformSync {
    pub fn new(transform: Transform, config: &NetConfig) -> Self {
        Self {
            transform,
            last_sent: transform,
            next_send_ms: 0.0,
            idle_pending: false,
            send_interval_ms: config.send_interval_ms,
            position_threshold: config.interpolation.position_threshold,
            rotation_threshold: config.interpolation.rotation_threshold,
            buffer: SnapshotBuffer::new(
                config.interpolation.clone(),
                transform,
                config.send_interval_ms,
                config.tick_interval_ms(),
            ),
        }
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    pub(crate) fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Produces a delta carrying only the fields that moved past their
    /// threshold since the last send. After motion stops one empty delta is
    /// sent so receivers get a snapshot bracketing the final pose.
    pub fn collect_delta(
        &mut self,
        entity_id: u32,
        local_now_ms: f64,
        server_now_ms: f64,
    ) -> Option<TransformDelta> {
        if local_now_ms < self.next_send_ms {
            return None;
        }
        self.next_send_ms = local_now_ms + self.send_interval_ms;

        let position_changed = self.transform.position.distance(self.last_sent.position)
            > self.position_threshold;
        let rotation_changed = 1.0 - self.transform.rotation.dot(self.last_sent.rotation).abs()
            > self.rotation_threshold;

        if !position_changed && !rotation_changed {
            if !self.idle_pending {
                return None;
            }
            self.idle_pending = false;
            return Some(TransformDelta {
                entity_id,
                timestamp_ms: server_now_ms,
                position: None,
                rotation: None,
            });
        }

        self.idle_pending = true;
        let mut delta = TransformDelta {
            entity_id,
            timestamp_ms: server_now_ms,
            position: None,
            rotation: None,
        };
        if position_changed {
            delta.position = Some(self.transform.position);
            self.last_sent.position = self.transform.position;
        }
        if rotation_changed {
            delta.rotation = Some(self.transform.rotation);
            self.last_sent.rotation = self.transform.rotation;
        }
        Some(delta)
    }

    pub fn ingest(&mut self, delta: &TransformDelta, server_now_ms: f64) -> bool {
        self.buffer.insert_delta(delta, server_now_ms)
    }

    pub fn render(&mut self, server_now_ms: f64) -> Option<Transform> {
        let sample = self.buffer.tick(server_now_ms)?;
        self.transform = sample.transform;
        Some(sample.transform)
    }

    /// Called when the writing side changes hands; stale snapshots from the
    /// previous writer must not be replayed.
    pub fn rebase(&mut self) {
        self.last_sent = self.transform;
        self.idle_pending = false;
        self.buffer.clear(self.transform);
    }
}
