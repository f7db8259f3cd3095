//! Ray/scene intersection interface.
//!
//! The tracer only needs the nearest face along a ray and where on that face
//! the ray landed. Anything answering that can drive a render: the built-in
//! [`TriangleBvh`](crate::TriangleBvh), or Embree with the `embree` feature.

use lumen_math::Ray;

/// Nearest hit of a ray.
///
/// Barycentrics follow the usual convention: the hit point is
/// `(1 - u - v) * v0 + u * v1 + v * v2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Global face index into the scene.
    pub face: usize,
    pub u: f64,
    pub v: f64,
    /// Distance along the (unit) ray direction.
    pub t: f64,
}

/// Nearest-hit queries against a committed triangle scene.
pub trait Intersector: Send + Sync {
    fn intersect(&self, ray: &Ray) -> Option<Hit>;

    /// Answer several rays at once. The default answers them one by one.
    fn intersect_batch(&self, rays: &[Ray]) -> Vec<Option<Hit>> {
        rays.iter().map(|ray| self.intersect(ray)).collect()
    }
}
