use crate::DVec3;

/// A ray in 3D space with origin and direction.
///
/// Paths are traced in double precision; the direction is expected to be
/// unit length but nothing here enforces it.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: DVec3,
    pub direction: DVec3,
}

impl Ray {
    /// Create a new ray.
    pub fn new(origin: DVec3, direction: DVec3) -> Self {
        Self { origin, direction }
    }

    /// Get the point along the ray at parameter t.
    ///
    /// Returns: origin + t * direction
    #[inline]
    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.direction * t
    }

    /// Move the origin a small distance along the direction.
    #[inline]
    pub fn advanced(&self, distance: f64) -> Self {
        Self::new(self.at(distance), self.direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ray_at() {
        let ray = Ray::new(DVec3::ZERO, DVec3::X);

        assert_eq!(ray.at(0.0), DVec3::ZERO);
        assert_eq!(ray.at(1.0), DVec3::X);
        assert_eq!(ray.at(-1.0), DVec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn test_ray_advanced() {
        let ray = Ray::new(DVec3::new(1.0, 0.0, 0.0), DVec3::Y);
        let moved = ray.advanced(0.5);

        assert_eq!(moved.origin, DVec3::new(1.0, 0.5, 0.0));
        assert_eq!(moved.direction, DVec3::Y);
    }
}
