//! Job file: the JSON description of a render.
//!
//! Every entry of the `shapes`, `materials`, `light_sources` and `cameras`
//! arrays is decoded on its own. A malformed entry is logged and excluded,
//! but its slot is kept (`None`) so indices stay aligned with the file.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::scene::FaceOrientation;

/// Errors that abort loading a job file.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Failed to read job file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Job file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type JobResult<T> = Result<T, JobError>;

/// Shape scale: one uniform factor or one per axis.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Scale {
    Uniform(f64),
    PerAxis([f64; 3]),
}

impl Default for Scale {
    fn default() -> Self {
        Scale::Uniform(1.0)
    }
}

impl Scale {
    pub fn as_array(&self) -> [f64; 3] {
        match *self {
            Scale::Uniform(s) => [s; 3],
            Scale::PerAxis(s) => s,
        }
    }
}

/// One mesh placed in the world.
#[derive(Debug, Clone, Deserialize)]
pub struct ShapeConfig {
    pub filename: PathBuf,
    #[serde(default)]
    pub scale: Scale,
    #[serde(default)]
    pub position: [f64; 3],
    /// XYZ Euler angles in degrees.
    #[serde(default)]
    pub rotation: [f64; 3],
    #[serde(default)]
    pub face_direction: Option<String>,
    #[serde(default)]
    pub material: Option<String>,
}

impl ShapeConfig {
    pub fn orientation(&self) -> FaceOrientation {
        self.face_direction
            .as_deref()
            .map(FaceOrientation::from_name)
            .unwrap_or_default()
    }
}

/// Optical parameters of a material.
#[derive(Debug, Clone, Deserialize)]
pub struct MaterialConfig {
    pub name: String,
    #[serde(default, alias = "roughness")]
    pub roughness_alpha: f64,
    #[serde(default, alias = "constant_reflectance")]
    pub constant_ref_ratio: f64,
    pub ior: f64,
    #[serde(default)]
    pub transmittance: f64,
    #[serde(default)]
    pub diffuse_color: Option<[f64; 3]>,
    #[serde(default, alias = "absorption")]
    pub absorption_coef: Option<[f64; 3]>,
}

/// Disk shape of a parallel light.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DiskShape {
    pub radius: f64,
}

/// Parallel rays emitted from a disk.
#[derive(Debug, Clone, Deserialize)]
pub struct ParallelLightConfig {
    pub origin: [f64; 3],
    /// Plane normal, also the emission direction.
    pub direction: [f64; 3],
    pub num_ray: u64,
    #[serde(default)]
    pub wavelength: f64,
    pub total_flux: f64,
    pub shape: DiskShape,
}

/// Rays subsampled from a recorded ray file.
#[derive(Debug, Clone, Deserialize)]
pub struct RayFileLightConfig {
    pub origin: [f64; 3],
    #[serde(default)]
    pub x_dir: Option<[f64; 3]>,
    #[serde(default)]
    pub y_dir: Option<[f64; 3]>,
    #[serde(default)]
    pub z_dir: Option<[f64; 3]>,
    /// Axis kept exact when the frame is orthogonalised: "x", "y" or "z".
    pub optical: String,
    pub path: PathBuf,
    pub num_ray: u64,
    pub total_flux: f64,
}

/// An emitter entry, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum LightSourceConfig {
    #[serde(rename = "parallel")]
    Parallel(ParallelLightConfig),
    #[serde(rename = "ray_file", alias = "osram")]
    RayFile(RayFileLightConfig),
}

fn default_far() -> f64 {
    1.0
}

fn default_projection() -> String {
    "perspective".to_string()
}

/// One camera and its output image.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub origin: [f64; 3],
    #[serde(default)]
    pub eye_dir: Option<[f64; 3]>,
    #[serde(default)]
    pub horz_dir: Option<[f64; 3]>,
    #[serde(default)]
    pub vert_dir: Option<[f64; 3]>,
    pub pixel_width: u32,
    pub pixel_height: u32,
    pub horz_range: f64,
    pub vert_range: f64,
    #[serde(default = "default_far")]
    pub far: f64,
    pub pass: u32,
    /// "parallel"; anything else is a perspective projection.
    #[serde(default = "default_projection")]
    pub projection_mode: String,
    pub output_filename: PathBuf,
}

impl CameraConfig {
    pub fn is_parallel(&self) -> bool {
        self.projection_mode == "parallel"
    }
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_zenith() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

fn default_center() -> [f64; 3] {
    [1.0, 0.0, 0.0]
}

/// Panorama or constant radiance seen by escaped paths.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_zenith")]
    pub zenith_dir: [f64; 3],
    #[serde(default = "default_center")]
    pub center_dir: [f64; 3],
    #[serde(default)]
    pub constant: Option<[f64; 3]>,
}

/// Grid resolution of tabulated rough BSDFs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BsdfResolutionConfig {
    pub incidence: usize,
    pub azimuth: usize,
    pub polar: usize,
}

impl Default for BsdfResolutionConfig {
    fn default() -> Self {
        Self {
            incidence: 257,
            azimuth: 257,
            polar: 257,
        }
    }
}

/// Renderer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Worker count; `None` uses the available parallelism.
    pub threads: Option<usize>,
    pub seed: u64,
    pub max_bounces: u32,
    pub ray_offset: f64,
    pub terminal_length: f64,
    pub progress_interval_ms: u64,
    pub bsdf_resolution: BsdfResolutionConfig,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            threads: None,
            seed: 444,
            max_bounces: 5000,
            ray_offset: 0.005,
            terminal_length: 10.0,
            progress_interval_ms: 2000,
            bsdf_resolution: BsdfResolutionConfig::default(),
        }
    }
}

/// Emitter tracing: follow every light-source ray and tally what escapes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LightTraceSettings {
    pub enabled: bool,
    /// Number of path polylines to record.
    pub trace_limit: usize,
    /// JSON file receiving the recorded polylines.
    pub trace_output: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawJob {
    #[serde(default)]
    shapes: Vec<Value>,
    #[serde(default)]
    materials: Vec<Value>,
    #[serde(default, alias = "lightsources")]
    light_sources: Vec<Value>,
    #[serde(default)]
    cameras: Vec<Value>,
    #[serde(default)]
    environment: Option<Value>,
    #[serde(default)]
    render: Option<Value>,
    #[serde(default)]
    light_trace: Option<Value>,
}

/// A decoded job file.
#[derive(Debug, Clone, Default)]
pub struct JobConfig {
    /// Directory relative paths are resolved against.
    pub base_dir: PathBuf,
    pub shapes: Vec<Option<ShapeConfig>>,
    pub materials: Vec<Option<MaterialConfig>>,
    pub light_sources: Vec<Option<LightSourceConfig>>,
    pub cameras: Vec<Option<CameraConfig>>,
    pub environment: Option<EnvironmentConfig>,
    pub render: RenderSettings,
    pub light_trace: LightTraceSettings,
}

impl JobConfig {
    /// Read and decode a job file.
    pub fn load(path: impl AsRef<Path>) -> JobResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| JobError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json_str(&text, base_dir)
    }

    /// Decode a job from JSON text.
    pub fn from_json_str(text: &str, base_dir: impl Into<PathBuf>) -> JobResult<Self> {
        let raw: RawJob = serde_json::from_str(text)?;

        Ok(Self {
            base_dir: base_dir.into(),
            shapes: parse_entries("shapes", raw.shapes),
            materials: parse_entries("materials", raw.materials),
            light_sources: parse_entries("light_sources", raw.light_sources),
            cameras: parse_entries("cameras", raw.cameras),
            environment: raw.environment.and_then(|v| parse_section("environment", v)),
            render: raw
                .render
                .and_then(|v| parse_section("render", v))
                .unwrap_or_default(),
            light_trace: raw
                .light_trace
                .and_then(|v| parse_section("light_trace", v))
                .unwrap_or_default(),
        })
    }

    /// Resolve a path from the job file against its directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Index of the first valid material with this name.
    pub fn material_index(&self, name: &str) -> Option<usize> {
        self.materials
            .iter()
            .position(|m| m.as_ref().is_some_and(|m| m.name == name))
    }

    /// Indices of materials referenced by at least one valid shape.
    pub fn referenced_materials(&self) -> Vec<bool> {
        let mut used = vec![false; self.materials.len()];
        for shape in self.shapes.iter().flatten() {
            if let Some(index) = shape.material.as_deref().and_then(|n| self.material_index(n)) {
                used[index] = true;
            }
        }
        used
    }
}

fn parse_entries<T: DeserializeOwned>(section: &str, values: Vec<Value>) -> Vec<Option<T>> {
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Excluding {}[{}]: {}", section, index, e);
                None
            }
        })
        .collect()
}

fn parse_section<T: DeserializeOwned>(section: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(entry) => Some(entry),
        Err(e) => {
            log::warn!("Ignoring malformed {} section: {}", section, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"{
        "shapes": [
            {"filename": "lens.stl", "scale": 2.0, "position": [0, 0, 1], "face_direction": "outer", "material": "glass"},
            {"scale": 1.0},
            {"filename": "box.obj", "scale": [1, 2, 3], "material": "nope"}
        ],
        "materials": [
            {"name": "glass", "ior": 1.5, "transmittance": 1.0, "absorption_coef": [0.1, 0.1, 0.1]},
            {"name": "rough", "ior": 1.3, "roughness_alpha": 0.2}
        ],
        "lightsources": [
            {"type": "parallel", "origin": [0, 0, -1], "direction": [0, 0, 1], "num_ray": 100,
             "wavelength": 550, "total_flux": 1.0, "shape": {"radius": 0.5}},
            {"type": "osram", "origin": [0, 0, 0], "x_dir": [1, 0, 0], "z_dir": [0, 0, 1],
             "optical": "z", "path": "rays.bin", "num_ray": 10, "total_flux": 2.0},
            {"type": "laser"}
        ],
        "cameras": [
            {"origin": [0, 0, -5], "eye_dir": [0, 0, 1], "vert_dir": [0, 1, 0],
             "pixel_width": 4, "pixel_height": 3, "horz_range": 1, "vert_range": 0.75,
             "pass": 2, "projection_mode": "parallel", "output_filename": "out.png"}
        ],
        "render": {"threads": 2, "max_bounces": 100}
    }"#;

    #[test]
    fn test_parse_job_keeps_gaps() {
        let job = JobConfig::from_json_str(JOB, "/jobs").unwrap();

        assert_eq!(job.shapes.len(), 3);
        assert!(job.shapes[1].is_none());
        assert_eq!(job.light_sources.len(), 3);
        assert!(matches!(job.light_sources[0], Some(LightSourceConfig::Parallel(_))));
        assert!(matches!(job.light_sources[1], Some(LightSourceConfig::RayFile(_))));
        assert!(job.light_sources[2].is_none());

        let shape = job.shapes[0].as_ref().unwrap();
        assert_eq!(shape.scale.as_array(), [2.0; 3]);
        assert_eq!(shape.orientation(), FaceOrientation::Outer);
        assert_eq!(
            job.shapes[2].as_ref().unwrap().orientation(),
            FaceOrientation::Auto
        );

        let camera = job.cameras[0].as_ref().unwrap();
        assert!(camera.is_parallel());
        assert_eq!(camera.far, 1.0);
        assert!(camera.horz_dir.is_none());
    }

    #[test]
    fn test_render_defaults_are_merged() {
        let job = JobConfig::from_json_str(JOB, "/jobs").unwrap();

        assert_eq!(job.render.threads, Some(2));
        assert_eq!(job.render.max_bounces, 100);
        assert_eq!(job.render.seed, 444);
        assert_eq!(job.render.ray_offset, 0.005);
        assert_eq!(job.render.bsdf_resolution.polar, 257);
        assert!(!job.light_trace.enabled);
    }

    #[test]
    fn test_material_lookup() {
        let job = JobConfig::from_json_str(JOB, "/jobs").unwrap();

        assert_eq!(job.material_index("glass"), Some(0));
        assert_eq!(job.material_index("nope"), None);
        assert_eq!(job.referenced_materials(), vec![true, false]);
        assert_eq!(job.materials[1].as_ref().unwrap().roughness_alpha, 0.2);
    }

    #[test]
    fn test_resolve_path() {
        let job = JobConfig::from_json_str("{}", "/jobs").unwrap();

        assert_eq!(job.resolve_path(Path::new("a.obj")), PathBuf::from("/jobs/a.obj"));
        assert_eq!(job.resolve_path(Path::new("/abs/a.obj")), PathBuf::from("/abs/a.obj"));
    }

    #[test]
    fn test_invalid_json_is_fatal() {
        assert!(matches!(
            JobConfig::from_json_str("{ not json", "."),
            Err(JobError::Json(_))
        ));
        assert!(matches!(
            JobConfig::load("/definitely/not/here.json"),
            Err(JobError::Io { .. })
        ));
    }
}
