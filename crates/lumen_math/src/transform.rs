// Transform utilities for DMat4
//
// Extends glam::DMat4 with the pieces needed to place shapes in the world.
// Note: glam::DMat4 already provides transform_point3() and transform_vector3()

use glam::{DMat3, DMat4, DQuat, DVec3, EulerRot};

/// Extension trait for DMat4 to provide additional transform utilities
pub trait DMat4Ext {
    /// Scale, then rotate (XYZ Euler angles in degrees), then translate.
    fn from_shape_transform(scale: DVec3, rotation_degrees: DVec3, translation: DVec3) -> Self;

    /// Transform a surface normal (inverse transpose of the linear part).
    /// The result is normalized; degenerate input yields zero.
    fn transform_normal3(&self, normal: DVec3) -> DVec3;
}

impl DMat4Ext for DMat4 {
    fn from_shape_transform(scale: DVec3, rotation_degrees: DVec3, translation: DVec3) -> Self {
        let rotation = DQuat::from_euler(
            EulerRot::XYZ,
            rotation_degrees.x.to_radians(),
            rotation_degrees.y.to_radians(),
            rotation_degrees.z.to_radians(),
        );
        DMat4::from_scale_rotation_translation(scale, rotation, translation)
    }

    fn transform_normal3(&self, normal: DVec3) -> DVec3 {
        let normal_matrix = DMat3::from_mat4(*self).inverse().transpose();
        (normal_matrix * normal).normalize_or_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_transform_order() {
        let m = DMat4::from_shape_transform(DVec3::splat(2.0), DVec3::ZERO, DVec3::new(1.0, 0.0, 0.0));
        let p = m.transform_point3(DVec3::new(1.0, 1.0, 1.0));
        assert!((p - DVec3::new(3.0, 2.0, 2.0)).length() < 1e-12);
    }

    #[test]
    fn test_normal_under_nonuniform_scale() {
        // Plane x = y scaled along x: the normal must stay perpendicular to the surface
        let m = DMat4::from_scale(DVec3::new(2.0, 1.0, 1.0));
        let n = DVec3::new(1.0, -1.0, 0.0).normalize();
        let tangent = DVec3::new(1.0, 1.0, 0.0);

        let n2 = m.transform_normal3(n);
        let t2 = m.transform_vector3(tangent);
        assert!(n2.dot(t2).abs() < 1e-12);
        assert!((n2.length() - 1.0).abs() < 1e-12);
    }
}
