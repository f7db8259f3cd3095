// Re-export glam for convenience
pub use glam::*;

// Lumen math types
mod aabb;
mod frame;
mod interval;
mod ray;
mod transform;

pub use aabb::Aabb;
pub use frame::{complete_frame, orthonormal_basis, rotate_about, FrameAxes};
pub use interval::Interval;
pub use ray::Ray;
pub use transform::DMat4Ext;
