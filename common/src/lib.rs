//! Math shared by the crowd crates: bounding boxes and transform helpers.

pub mod aabb;
pub mod transform_ops;

pub use aabb::Aabb;

/// Tolerance used for floating point comparisons.
pub const EPSILON: f32 = 1e-6;
