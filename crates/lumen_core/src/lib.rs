//! Lumen Core - scene description for the light-transport engine.
//!
//! This crate provides:
//!
//! - **Meshes**: `Mesh` plus OBJ and binary STL loaders
//! - **Scene**: the flattened triangle soup the tracer and intersector share
//! - **Job files**: `JobConfig`, the JSON description of a render
//! - **Environment**: direction to radiance lookup for escaped paths
//!
//! # Example
//!
//! ```ignore
//! use lumen_core::JobConfig;
//!
//! let job = JobConfig::load("job.json")?;
//! println!("{} shapes, {} cameras", job.shapes.len(), job.cameras.len());
//! ```

pub mod environment;
pub mod job;
pub mod mesh;
pub mod scene;

/// Per-channel power or radiance (R, G, B).
pub type Color = lumen_math::DVec3;

// Re-export commonly used types
pub use environment::{Environment, EnvironmentError};
pub use job::{
    BsdfResolutionConfig, CameraConfig, DiskShape, EnvironmentConfig, JobConfig, JobError,
    LightSourceConfig, LightTraceSettings, MaterialConfig, ParallelLightConfig,
    RayFileLightConfig, RenderSettings, Scale, ShapeConfig,
};
pub use mesh::{load_mesh, Mesh, MeshError};
pub use scene::{FaceOrientation, Scene, ShapeCursor, ShapeInfo};
