//! Triangle mesh representation and file loaders.
//!
//! Meshes are loaded per shape, placed with the shape transform and then
//! appended to the flattened [`Scene`](crate::Scene). Supported inputs are
//! Wavefront OBJ (through `tobj`) and binary STL.

use std::collections::HashMap;
use std::path::Path;

use lumen_math::{Aabb, DMat4, DMat4Ext, DVec3};
use thiserror::Error;

/// Errors that can occur while loading a mesh file.
#[derive(Error, Debug)]
pub enum MeshError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OBJ load error: {0}")]
    Obj(#[from] tobj::LoadError),

    #[error("Malformed STL file: {0}")]
    Stl(String),

    #[error("Unsupported mesh format: {0}")]
    UnsupportedFormat(String),
}

pub type MeshResult<T> = Result<T, MeshError>;

/// A mesh consisting of vertex positions, vertex normals and triangle indices.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    /// Vertex positions (one DVec3 per vertex)
    pub positions: Vec<DVec3>,

    /// Vertex normals, same length as `positions`
    pub normals: Vec<DVec3>,

    /// Triangle indices (every 3 indices form a triangle, counter-clockwise)
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Create a new mesh. Smooth normals are computed when `normals` is
    /// missing or does not match the vertex count.
    pub fn new(positions: Vec<DVec3>, indices: Vec<u32>, normals: Option<Vec<DVec3>>) -> Self {
        let mut mesh = Self {
            positions,
            normals: Vec::new(),
            indices,
        };
        match normals {
            Some(normals) if normals.len() == mesh.positions.len() => mesh.normals = normals,
            Some(normals) => {
                log::debug!(
                    "Normals array length ({}) doesn't match vertex count ({}), computing smooth normals",
                    normals.len(),
                    mesh.positions.len()
                );
                mesh.compute_normals();
            }
            None => mesh.compute_normals(),
        }
        mesh
    }

    /// Compute smooth vertex normals by averaging area-weighted face normals.
    pub fn compute_normals(&mut self) {
        let vertex_count = self.positions.len();
        let mut normals = vec![DVec3::ZERO; vertex_count];

        for face in self.indices.chunks_exact(3) {
            let [i0, i1, i2] = [face[0] as usize, face[1] as usize, face[2] as usize];
            if i0 >= vertex_count || i1 >= vertex_count || i2 >= vertex_count {
                continue;
            }

            let p0 = self.positions[i0];
            let face_normal = (self.positions[i1] - p0).cross(self.positions[i2] - p0);

            normals[i0] += face_normal;
            normals[i1] += face_normal;
            normals[i2] += face_normal;
        }

        for normal in &mut normals {
            *normal = normal.try_normalize().unwrap_or(DVec3::Z);
        }

        self.normals = normals;
    }

    /// Apply a shape transform to positions and normals.
    pub fn transformed(&self, transform: &DMat4) -> Mesh {
        Mesh {
            positions: self
                .positions
                .iter()
                .map(|p| transform.transform_point3(*p))
                .collect(),
            normals: self
                .normals
                .iter()
                .map(|n| transform.transform_normal3(*n))
                .collect(),
            indices: self.indices.clone(),
        }
    }

    /// Axis-aligned bounds of all positions.
    pub fn bounds(&self) -> Aabb {
        self.positions
            .iter()
            .fold(Aabb::EMPTY, |acc, p| Aabb::surrounding(&acc, &Aabb::from_points(*p, *p)))
    }

    /// Get the number of triangles in the mesh.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get the number of vertices in the mesh.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}

/// Load a mesh, choosing the reader from the file extension.
pub fn load_mesh(path: impl AsRef<Path>) -> MeshResult<Mesh> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "obj" => load_obj(path),
        "stl" => load_stl(path),
        other => Err(MeshError::UnsupportedFormat(format!(
            "{} (.{})",
            path.display(),
            other
        ))),
    }
}

/// Load every model of an OBJ file into one mesh.
pub fn load_obj(path: impl AsRef<Path>) -> MeshResult<Mesh> {
    let (models, _materials) = tobj::load_obj(
        path.as_ref(),
        &tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ..Default::default()
        },
    )?;

    let mut positions = Vec::new();
    let mut normals = Vec::new();
    let mut indices = Vec::new();
    let mut has_normals = true;

    for model in &models {
        let mesh = &model.mesh;
        let base = positions.len() as u32;

        positions.extend(
            mesh.positions
                .chunks_exact(3)
                .map(|p| DVec3::new(p[0] as f64, p[1] as f64, p[2] as f64)),
        );
        if mesh.normals.len() == mesh.positions.len() {
            normals.extend(
                mesh.normals
                    .chunks_exact(3)
                    .map(|n| DVec3::new(n[0] as f64, n[1] as f64, n[2] as f64).normalize_or_zero()),
            );
        } else {
            has_normals = false;
        }
        indices.extend(mesh.indices.iter().map(|i| base + i));
    }

    log::debug!(
        "OBJ {}: {} models, {} vertices, normals: {}",
        path.as_ref().display(),
        models.len(),
        positions.len(),
        has_normals
    );

    Ok(Mesh::new(positions, indices, has_normals.then_some(normals)))
}

/// Load a binary STL file.
pub fn load_stl(path: impl AsRef<Path>) -> MeshResult<Mesh> {
    let data = std::fs::read(path)?;
    parse_binary_stl(&data)
}

const STL_HEADER_SIZE: usize = 80;
const STL_FACET_SIZE: usize = 50;

/// Parse binary STL data. Identical vertices are merged so that smooth
/// normals can be computed across facets.
pub fn parse_binary_stl(data: &[u8]) -> MeshResult<Mesh> {
    let count_bytes = data
        .get(STL_HEADER_SIZE..STL_HEADER_SIZE + 4)
        .ok_or_else(|| MeshError::Stl("file shorter than header".to_string()))?;
    let facet_count = u32::from_le_bytes([count_bytes[0], count_bytes[1], count_bytes[2], count_bytes[3]]) as usize;

    let body = &data[STL_HEADER_SIZE + 4..];
    if body.len() < facet_count * STL_FACET_SIZE {
        return Err(MeshError::Stl(format!(
            "expected {} facets, found {} bytes",
            facet_count,
            body.len()
        )));
    }

    let read_f32 = |bytes: &[u8], offset: usize| {
        f32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
    };

    let mut positions = Vec::new();
    let mut indices = Vec::with_capacity(facet_count * 3);
    let mut lookup: HashMap<[u32; 3], u32> = HashMap::new();

    for facet in body.chunks_exact(STL_FACET_SIZE).take(facet_count) {
        // 12 bytes of facet normal, then three vertices
        for corner in 0..3 {
            let offset = 12 + corner * 12;
            let xyz = [
                read_f32(facet, offset),
                read_f32(facet, offset + 4),
                read_f32(facet, offset + 8),
            ];
            let key = xyz.map(f32::to_bits);
            let index = *lookup.entry(key).or_insert_with(|| {
                positions.push(DVec3::new(xyz[0] as f64, xyz[1] as f64, xyz[2] as f64));
                (positions.len() - 1) as u32
            });
            indices.push(index);
        }
    }

    Ok(Mesh::new(positions, indices, None))
}
