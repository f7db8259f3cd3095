//! Lumen Renderer - Monte Carlo light transport
//!
//! Traces power-carrying rays through triangle scenes with tabulated
//! microfacet BSDFs. Two drivers share one path tracer: camera rendering
//! against an environment, and forward tracing of light-source rays.

mod sampling;
mod distribution;
mod fresnel;
mod microfacet;
mod material;
mod light;
mod intersect;
mod bvh;
#[cfg(feature = "embree")]
mod embree;
mod camera;
mod stats;
mod tracer;
mod output;
mod renderer;
mod light_trace;
mod world;

pub use sampling::{cosine_polar_angle, gen_f64, halton};
pub use distribution::{PiecewiseLinearDistribution, SIMPLIFY_TOLERANCE};
pub use fresnel::Fresnel;
pub use microfacet::{BsdfResolution, BsdfSample, BsdfTable, Ggx, MicrofacetModel};
pub use material::{
    Interaction, Material, MaterialError, MaterialTable, ScatterError, ScatterResult,
};
pub use light::{
    parse_ray_file, DiskLight, FileLight, LightCursor, LightError, LightResult, LightSample,
    LightSource, LightSourceSet, RayRecord, RAY_FILE_HEADER_SIZE, RAY_FILE_RECORD_SIZE,
};
pub use intersect::{Hit, Intersector};
pub use bvh::TriangleBvh;
#[cfg(feature = "embree")]
pub use embree::{EmbreeError, EmbreeScene};
pub use camera::{Camera, CameraError, CameraResult, Projection};
pub use stats::RenderStats;
pub use tracer::{PathOutcome, PathTracer, TraceConfig, TraceContext, TraceError, TraceResult};
pub use output::{to_ldr, ImageBuffer, OutputError, OutputResult, GAMMA};
pub use renderer::{worker_count, RenderError, RenderOrchestrator, RenderResult};
pub use light_trace::{trace_lights, LightTraceOptions, LightTraceReport, SourceTally, TracedPath};
pub use world::{CameraJob, World, WorldError, WorldResult};

/// Re-export the shared color type and common math types
pub use lumen_core::Color;
pub use lumen_math::{DVec3, Ray};
