//! Math types for 3D graphics
//!
//! Thin aliases over nalgebra so the rest of the engine never names the
//! underlying library directly.

pub use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn mat4_is_column_major_in_memory() {
        let translation = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let slice = translation.as_slice();
        // Column-major: the translation occupies the last column.
        assert_relative_eq!(slice[12], 1.0);
        assert_relative_eq!(slice[13], 2.0);
        assert_relative_eq!(slice[14], 3.0);
        assert_relative_eq!(slice[15], 1.0);
    }

    #[test]
    fn identity_transform_is_a_no_op() {
        let point = Vec4::new(1.0, -2.0, 0.5, 1.0);
        let transformed = Mat4::identity() * point;
        assert_relative_eq!(transformed, point);
    }
}
