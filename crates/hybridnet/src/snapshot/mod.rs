mod buffer;
mod transform;

pub use buffer::{InterpolatedSample, SnapshotBuffer, Transform, TransformSnapshot, inverse_lerp};
pub use transform::TransformSync;
