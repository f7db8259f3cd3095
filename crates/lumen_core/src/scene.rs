//! Flattened scene shared by the intersector and the path tracer.
//!
//! All shapes are concatenated into a single triangle soup. A cumulative
//! face-count table maps a global face index back to the shape it came from,
//! and through that to the shape's material and normal orientation policy.

use lumen_math::{Aabb, DVec3};

use crate::Mesh;

/// How a shape's vertex normals relate to its material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaceOrientation {
    /// Normals point out of the material.
    Outer,
    /// Normals point into the material.
    Inner,
    /// Orientation is inferred per hit from the incident direction.
    #[default]
    Auto,
}

impl FaceOrientation {
    /// Parse a job-file `face_direction` value; anything unrecognised is `Auto`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "outer" => FaceOrientation::Outer,
            "inner" => FaceOrientation::Inner,
            _ => FaceOrientation::Auto,
        }
    }
}

/// Per-shape data needed at hit time.
#[derive(Debug, Clone, Default)]
pub struct ShapeInfo {
    pub name: String,
    /// Index into the material table, `None` when unresolved.
    pub material: Option<usize>,
    pub orientation: FaceOrientation,
}

/// Single-slot cache of the last resolved shape. One per worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeCursor {
    last: usize,
}

/// Flattened triangle soup with a shape lookup table.
#[derive(Debug, Clone)]
pub struct Scene {
    pub positions: Vec<DVec3>,
    pub normals: Vec<DVec3>,
    pub triangles: Vec<[u32; 3]>,
    pub face_normals: Vec<DVec3>,
    /// `face_offsets[k]..face_offsets[k + 1]` are the faces of shape `k`.
    face_offsets: Vec<usize>,
    shapes: Vec<ShapeInfo>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            positions: Vec::new(),
            normals: Vec::new(),
            triangles: Vec::new(),
            face_normals: Vec::new(),
            face_offsets: vec![0],
            shapes: Vec::new(),
        }
    }

    /// Append a shape. An empty mesh still occupies a shape slot so that
    /// shape indices match the job file.
    pub fn add_shape(&mut self, mesh: &Mesh, info: ShapeInfo) {
        let base = self.positions.len() as u32;
        self.positions.extend_from_slice(&mesh.positions);
        self.normals.extend_from_slice(&mesh.normals);

        for face in mesh.indices.chunks_exact(3) {
            let tri = [base + face[0], base + face[1], base + face[2]];
            let [v0, v1, v2] = self.triangle_from(tri);
            self.face_normals.push((v1 - v0).cross(v2 - v0).normalize_or_zero());
            self.triangles.push(tri);
        }

        self.face_offsets.push(self.triangles.len());
        self.shapes.push(info);
    }

    fn triangle_from(&self, tri: [u32; 3]) -> [DVec3; 3] {
        tri.map(|i| self.positions[i as usize])
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn face_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn shape(&self, index: usize) -> &ShapeInfo {
        &self.shapes[index]
    }

    pub fn shapes(&self) -> &[ShapeInfo] {
        &self.shapes
    }

    /// Range of global face indices belonging to a shape.
    pub fn shape_faces(&self, index: usize) -> std::ops::Range<usize> {
        self.face_offsets[index]..self.face_offsets[index + 1]
    }

    /// Vertex positions of a face.
    pub fn triangle(&self, face: usize) -> [DVec3; 3] {
        self.triangle_from(self.triangles[face])
    }

    /// Geometric normal of a face (counter-clockwise winding).
    pub fn flat_normal(&self, face: usize) -> DVec3 {
        self.face_normals[face]
    }

    /// Barycentric blend of vertex normals at `(u, v)`.
    ///
    /// Falls back to the flat normal when the blend degenerates.
    pub fn shading_normal(&self, face: usize, u: f64, v: f64) -> DVec3 {
        let [i0, i1, i2] = self.triangles[face].map(|i| i as usize);
        let blended =
            self.normals[i0] * (1.0 - u - v) + self.normals[i1] * u + self.normals[i2] * v;
        blended
            .try_normalize()
            .unwrap_or_else(|| self.flat_normal(face))
    }

    /// Shape index owning a global face index.
    ///
    /// Checks the cursor's last shape first, then binary-searches the
    /// cumulative face table.
    pub fn resolve_shape(&self, face: usize, cursor: &mut ShapeCursor) -> Option<usize> {
        if face >= self.face_count() {
            return None;
        }
        if cursor.last < self.shapes.len() && self.shape_faces(cursor.last).contains(&face) {
            return Some(cursor.last);
        }
        // Last offset <= face; empty shapes share an offset with their successor
        let shape = self.face_offsets.partition_point(|&offset| offset <= face) - 1;
        cursor.last = shape;
        Some(shape)
    }

    /// Bounds of every vertex in the scene.
    pub fn bounds(&self) -> Aabb {
        self.positions
            .iter()
            .fold(Aabb::EMPTY, |acc, p| Aabb::surrounding(&acc, &Aabb::from_points(*p, *p)))
    }
}
