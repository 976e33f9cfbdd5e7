//! Transform operations used when deforming and placing agent geometry.
//!
//! Pure functions over cgmath types: point/direction transforms, TRS
//! composition and rotation conversions.

use cgmath::{
    Deg, Euler, InnerSpace, Matrix, Matrix4, Point3, Quaternion, SquareMatrix, Vector3, Vector4, Zero,
};

use super::EPSILON;

// =============================================================================
// Point and Direction Transforms
// =============================================================================

/// Transforms a point (w = 1) by a 4x4 matrix.
pub fn transform_point(matrix: &Matrix4<f32>, point: Point3<f32>) -> Point3<f32> {
    let v = matrix * Vector4::new(point.x, point.y, point.z, 1.0);
    Point3::new(v.x, v.y, v.z)
}

/// Transforms a direction (w = 0) by a 4x4 matrix, ignoring translation.
pub fn transform_direction(matrix: &Matrix4<f32>, direction: Vector3<f32>) -> Vector3<f32> {
    let v = matrix * Vector4::new(direction.x, direction.y, direction.z, 0.0);
    Vector3::new(v.x, v.y, v.z)
}

/// Normalizes `v`, returning the zero vector for degenerate input.
pub fn normalize_or_zero(v: Vector3<f32>) -> Vector3<f32> {
    let len2 = v.magnitude2();
    if len2 < EPSILON * EPSILON {
        Vector3::zero()
    } else {
        v / len2.sqrt()
    }
}

/// Inverse transpose of the upper 3x3, embedded in a 4x4. Used to build a
/// normal matrix from a world pose when none is supplied.
pub fn normal_matrix(matrix: &Matrix4<f32>) -> Matrix4<f32> {
    let mut m = *matrix;
    m.w = Vector4::new(0.0, 0.0, 0.0, 1.0);
    m.x.w = 0.0;
    m.y.w = 0.0;
    m.z.w = 0.0;
    match m.invert() {
        Some(inv) => inv.transpose(),
        None => Matrix4::identity(),
    }
}

// =============================================================================
// Composition and Conversion
// =============================================================================

/// Builds `T * R * S`.
pub fn compose_trs(
    translation: Vector3<f32>,
    rotation: Quaternion<f32>,
    scale: Vector3<f32>,
) -> Matrix4<f32> {
    Matrix4::from_translation(translation)
        * Matrix4::from(rotation)
        * Matrix4::from_nonuniform_scale(scale.x, scale.y, scale.z)
}

/// Translation column of an affine matrix.
pub fn translation_of(matrix: &Matrix4<f32>) -> Vector3<f32> {
    matrix.w.truncate()
}

/// Euler angles in degrees (x, y, z) of a rotation.
pub fn quaternion_to_euler_degrees(rotation: Quaternion<f32>) -> Vector3<f32> {
    let euler = Euler::from(rotation);
    Vector3::new(
        Deg::from(euler.x).0,
        Deg::from(euler.y).0,
        Deg::from(euler.z).0,
    )
}

/// Returns true when every component of `a` and `b` is within EPSILON.
pub fn matrices_approx_eq(a: &Matrix4<f32>, b: &Matrix4<f32>) -> bool {
    let a: &[f32; 16] = a.as_ref();
    let b: &[f32; 16] = b.as_ref();
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= EPSILON * 10.0)
}
