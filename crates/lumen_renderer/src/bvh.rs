//! Bounding Volume Hierarchy (BVH) over the scene's triangles.
//!
//! Median split on the longest centroid axis, small leaves, Möller-Trumbore
//! at the leaves. This is the default intersector.

use lumen_core::Scene;
use lumen_math::{Aabb, DVec3, Interval, Ray};

use crate::intersect::{Hit, Intersector};

/// Maximum triangles per leaf node before splitting.
const LEAF_MAX_SIZE: usize = 4;

/// Hits closer than this are ignored.
const T_MIN: f64 = 1e-9;

/// Rays this close to parallel with a triangle miss it.
const PARALLEL_TOLERANCE: f64 = 1e-14;

/// BVH node - either a branch with two children or a leaf with faces.
enum BvhNode {
    Branch {
        left: Box<BvhNode>,
        right: Box<BvhNode>,
        bbox: Aabb,
    },
    Leaf {
        faces: Vec<usize>,
        bbox: Aabb,
    },
    Empty,
}

/// Triangle BVH built from a flattened [`Scene`].
pub struct TriangleBvh {
    root: BvhNode,
    triangles: Vec<[DVec3; 3]>,
}

impl TriangleBvh {
    pub fn new(scene: &Scene) -> Self {
        let triangles: Vec<[DVec3; 3]> = (0..scene.face_count()).map(|f| scene.triangle(f)).collect();
        Self::from_triangles(triangles)
    }

    pub fn from_triangles(triangles: Vec<[DVec3; 3]>) -> Self {
        let bounds: Vec<Aabb> = triangles
            .iter()
            .map(|[v0, v1, v2]| Aabb::from_triangle(*v0, *v1, *v2))
            .collect();
        let faces: Vec<usize> = (0..triangles.len()).collect();

        let root = if faces.is_empty() {
            BvhNode::Empty
        } else {
            Self::build(faces, &bounds)
        };
        log::debug!("BVH over {} triangles", triangles.len());
        Self { root, triangles }
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Recursive median-split construction.
    fn build(mut faces: Vec<usize>, bounds: &[Aabb]) -> BvhNode {
        let bbox = faces
            .iter()
            .fold(Aabb::EMPTY, |acc, &f| Aabb::surrounding(&acc, &bounds[f]));

        if faces.len() <= LEAF_MAX_SIZE {
            return BvhNode::Leaf { faces, bbox };
        }

        // Choose split axis based on centroid spread
        let centroid_bounds = faces.iter().fold(Aabb::EMPTY, |acc, &f| {
            let c = bounds[f].centroid();
            Aabb::surrounding(&acc, &Aabb::from_points(c, c))
        });
        let axis = centroid_bounds.longest_axis();

        faces.sort_unstable_by(|&a, &b| {
            bounds[a].centroid()[axis]
                .partial_cmp(&bounds[b].centroid()[axis])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let right_faces = faces.split_off(faces.len() / 2);
        let left = Self::build(faces, bounds);
        let right = Self::build(right_faces, bounds);

        BvhNode::Branch {
            left: Box::new(left),
            right: Box::new(right),
            bbox,
        }
    }

    fn hit_node(&self, node: &BvhNode, ray: &Ray, ray_t: Interval) -> Option<Hit> {
        match node {
            BvhNode::Empty => None,

            BvhNode::Leaf { faces, bbox } => {
                if !bbox.hit(ray, ray_t) {
                    return None;
                }
                let mut closest: Option<Hit> = None;
                for &face in faces {
                    let max = closest.map_or(ray_t.max, |h| h.t);
                    if let Some(hit) = self.hit_triangle(face, ray, ray_t.clipped(max)) {
                        closest = Some(hit);
                    }
                }
                closest
            }

            BvhNode::Branch { left, right, bbox } => {
                if !bbox.hit(ray, ray_t) {
                    return None;
                }
                let hit_left = self.hit_node(left, ray, ray_t);

                let right_t = hit_left.map_or(ray_t, |h| ray_t.clipped(h.t));
                let hit_right = self.hit_node(right, ray, right_t);

                hit_right.or(hit_left)
            }
        }
    }

    /// Möller-Trumbore ray-triangle intersection.
    fn hit_triangle(&self, face: usize, ray: &Ray, ray_t: Interval) -> Option<Hit> {
        let [v0, v1, v2] = self.triangles[face];
        let edge1 = v1 - v0;
        let edge2 = v2 - v0;

        let h = ray.direction.cross(edge2);
        let a = edge1.dot(h);
        if a.abs() < PARALLEL_TOLERANCE {
            return None;
        }

        let f = 1.0 / a;
        let s = ray.origin - v0;
        let u = f * s.dot(h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(edge1);
        let v = f * ray.direction.dot(q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = f * edge2.dot(q);
        if !ray_t.surrounds(t) {
            return None;
        }
        Some(Hit { face, u, v, t })
    }
}

impl Intersector for TriangleBvh {
    fn intersect(&self, ray: &Ray) -> Option<Hit> {
        self.hit_node(&self.root, ray, Interval::starting_at(T_MIN))
    }
}
