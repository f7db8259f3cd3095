use crate::{DVec3, Interval, Ray};

/// Smallest extent a triangle box gets along any axis, so that slab tests
/// against axis-aligned triangles still report a hit.
const MIN_EXTENT: f64 = 1e-4;

/// Axis-aligned bounding box stored as its two corners.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    /// Contains nothing; the identity of [`Aabb::surrounding`].
    pub const EMPTY: Aabb = Aabb {
        min: DVec3::INFINITY,
        max: DVec3::NEG_INFINITY,
    };

    /// Box spanned by two corner points, in any order.
    pub fn from_points(a: DVec3, b: DVec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Box of a triangle, widened to [`MIN_EXTENT`] along flat axes.
    pub fn from_triangle(v0: DVec3, v1: DVec3, v2: DVec3) -> Self {
        let min = v0.min(v1).min(v2);
        let max = v0.max(v1).max(v2);
        let pad = (DVec3::splat(MIN_EXTENT) - (max - min)).max(DVec3::ZERO) * 0.5;
        Self {
            min: min - pad,
            max: max + pad,
        }
    }

    pub fn surrounding(a: &Aabb, b: &Aabb) -> Self {
        Self {
            min: a.min.min(b.min),
            max: a.max.max(b.max),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn extent(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn centroid(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Index of the widest axis (0 = x, 1 = y, 2 = z).
    pub fn longest_axis(&self) -> usize {
        let e = self.extent();
        if e.x > e.y && e.x > e.z {
            0
        } else if e.y > e.z {
            1
        } else {
            2
        }
    }

    /// Slab test of `ray` against the box, restricted to `ray_t`.
    pub fn hit(&self, ray: &Ray, ray_t: Interval) -> bool {
        let inv = ray.direction.recip();
        let t0 = (self.min - ray.origin) * inv;
        let t1 = (self.max - ray.origin) * inv;
        let near = t0.min(t1).max_element().max(ray_t.min);
        let far = t0.max(t1).min_element().min(ray_t.max);
        near < far
    }
}
