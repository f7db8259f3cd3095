//! Everything a render needs, assembled from a job file.
//!
//! Broken shape, material, light and camera entries are logged and excluded
//! without stopping the job. Only an environment that cannot be loaded (or,
//! with the `embree` feature, an Embree failure) is fatal.

use std::path::PathBuf;

use lumen_core::{
    load_mesh, Environment, EnvironmentError, JobConfig, LightTraceSettings, Mesh, RenderSettings,
    Scene, ShapeInfo,
};
use lumen_math::{DMat4, DMat4Ext, DVec3};
use thiserror::Error;

use crate::bvh::TriangleBvh;
use crate::camera::Camera;
use crate::intersect::Intersector;
use crate::light::LightSourceSet;
use crate::light_trace::LightTraceOptions;
use crate::material::MaterialTable;
use crate::microfacet::BsdfResolution;
use crate::renderer::{worker_count, RenderOrchestrator};
use crate::tracer::{PathTracer, TraceConfig};

/// Fatal errors while assembling a world.
#[derive(Error, Debug)]
pub enum WorldError {
    #[error("Failed to load environment: {0}")]
    Environment(#[from] EnvironmentError),

    #[cfg(feature = "embree")]
    #[error(transparent)]
    Embree(#[from] crate::embree::EmbreeError),
}

pub type WorldResult<T> = Result<T, WorldError>;

/// A camera together with where its image goes.
#[derive(Debug, Clone)]
pub struct CameraJob {
    pub camera: Camera,
    /// Output path resolved against the job directory.
    pub output: PathBuf,
}

/// Scene, oracle, materials, emitters and cameras of one job.
pub struct World {
    pub scene: Scene,
    pub intersector: Box<dyn Intersector>,
    pub materials: MaterialTable,
    pub lights: LightSourceSet,
    pub environment: Environment,
    /// One slot per job camera; `None` for excluded entries.
    pub cameras: Vec<Option<CameraJob>>,
    pub settings: RenderSettings,
    pub light_trace: LightTraceSettings,
}

impl World {
    pub fn build(job: &JobConfig) -> WorldResult<Self> {
        let environment = match &job.environment {
            Some(config) => Environment::from_config(config, &job.base_dir)?,
            None => Environment::default(),
        };

        log::info!("Reading shapes");
        let scene = build_scene(job);
        log::info!(
            "Scene: {} shapes, {} triangles",
            scene.shape_count(),
            scene.face_count()
        );

        log::info!("Constructing tree");
        let intersector = build_intersector(&scene)?;

        log::info!("Preparing materials");
        let materials = MaterialTable::build(
            &job.materials,
            &job.referenced_materials(),
            BsdfResolution::from(job.render.bsdf_resolution),
        );

        log::info!("Preparing light sources");
        let lights = LightSourceSet::from_configs(&job.light_sources, &job.base_dir);

        let cameras = job
            .cameras
            .iter()
            .enumerate()
            .map(|(index, config)| {
                let config = config.as_ref()?;
                match Camera::from_config(config) {
                    Ok(camera) => Some(CameraJob {
                        output: job.resolve_path(&config.output_filename),
                        camera,
                    }),
                    Err(e) => {
                        log::warn!("Excluding cameras[{}]: {}", index, e);
                        None
                    }
                }
            })
            .collect();

        Ok(Self {
            scene,
            intersector,
            materials,
            lights,
            environment,
            cameras,
            settings: job.render.clone(),
            light_trace: job.light_trace.clone(),
        })
    }

    pub fn tracer(&self) -> PathTracer<'_> {
        PathTracer::new(
            &self.scene,
            self.intersector.as_ref(),
            &self.materials,
            TraceConfig::from(&self.settings),
        )
    }

    pub fn orchestrator(&self) -> RenderOrchestrator<'_> {
        RenderOrchestrator::new(self.tracer(), &self.environment, &self.settings)
    }

    pub fn light_trace_options(&self) -> LightTraceOptions {
        LightTraceOptions {
            threads: worker_count(&self.settings),
            seed: self.settings.seed,
            trace_limit: self.light_trace.trace_limit as u64,
            progress_interval: std::time::Duration::from_millis(
                self.settings.progress_interval_ms.max(1),
            ),
        }
    }
}

/// Load, place and flatten every shape. Failed shapes keep an empty slot.
fn build_scene(job: &JobConfig) -> Scene {
    let mut scene = Scene::new();

    for (index, config) in job.shapes.iter().enumerate() {
        let Some(config) = config else {
            scene.add_shape(&Mesh::default(), ShapeInfo::default());
            continue;
        };

        let material = config.material.as_deref().and_then(|name| {
            let found = job.material_index(name);
            if found.is_none() {
                log::warn!("shapes[{}]: unknown material {:?}", index, name);
            }
            found
        });
        let info = ShapeInfo {
            name: config.filename.display().to_string(),
            material,
            orientation: config.orientation(),
        };

        let path = job.resolve_path(&config.filename);
        match load_mesh(&path) {
            Ok(mesh) => {
                let transform = DMat4::from_shape_transform(
                    DVec3::from_array(config.scale.as_array()),
                    DVec3::from_array(config.rotation),
                    DVec3::from_array(config.position),
                );
                let mesh = mesh.transformed(&transform);
                log::info!(
                    "Shape {}: {} ({} triangles)",
                    index,
                    path.display(),
                    mesh.triangle_count()
                );
                scene.add_shape(&mesh, info);
            }
            Err(e) => {
                log::warn!("Excluding shapes[{}]: {}", index, e);
                scene.add_shape(&Mesh::default(), info);
            }
        }
    }
    scene
}

#[cfg(not(feature = "embree"))]
fn build_intersector(scene: &Scene) -> WorldResult<Box<dyn Intersector>> {
    Ok(Box::new(TriangleBvh::new(scene)))
}

#[cfg(feature = "embree")]
fn build_intersector(scene: &Scene) -> WorldResult<Box<dyn Intersector>> {
    if scene.face_count() == 0 {
        return Ok(Box::new(TriangleBvh::new(scene)));
    }
    Ok(Box::new(crate::embree::EmbreeScene::new(scene)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_tetra_obj(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(
            dir.join("tetra.obj"),
            "v 0 0 0\nv 1 0 0\nv 0 1 0\nv 0 0 1\nf 1 3 2\nf 1 2 4\nf 1 4 3\nf 2 3 4\n",
        )
        .unwrap();
    }

    #[test]
    fn test_build_world_with_gaps() {
        let dir = std::env::temp_dir().join("lumen_renderer_world_test");
        write_tetra_obj(&dir);

        let job = JobConfig::from_json_str(
            r#"{
                "shapes": [
                    {"filename": "tetra.obj", "position": [0, 0, 5], "material": "glass"},
                    {"filename": "missing.obj", "material": "glass"},
                    {"filename": "tetra.obj", "scale": 2.0, "material": "nothing"}
                ],
                "materials": [
                    {"name": "glass", "ior": 1.5, "transmittance": 1.0},
                    {"name": "broken", "ior": -1.0}
                ],
                "light_sources": [
                    {"type": "parallel", "origin": [0, 0, 0], "direction": [0, 0, 1],
                     "num_ray": 10, "total_flux": 1.0, "shape": {"radius": 0.1}},
                    {"type": "parallel", "origin": [0, 0, 0], "direction": [0, 0, 1],
                     "num_ray": 10, "total_flux": 1.0, "shape": {"radius": -1}}
                ],
                "cameras": [
                    {"origin": [0, 0, -5], "eye_dir": [0, 0, 1], "vert_dir": [0, 1, 0],
                     "pixel_width": 2, "pixel_height": 2, "horz_range": 1, "vert_range": 1,
                     "pass": 1, "output_filename": "out/a.png"},
                    {"origin": [0, 0, -5], "eye_dir": [0, 0, 1],
                     "pixel_width": 2, "pixel_height": 2, "horz_range": 1, "vert_range": 1,
                     "pass": 1, "output_filename": "b.png"}
                ],
                "environment": {"constant": [0.5, 0.5, 0.5]},
                "render": {"threads": 2}
            }"#,
            &dir,
        )
        .unwrap();

        let world = World::build(&job).unwrap();

        assert_eq!(world.scene.shape_count(), 3);
        assert_eq!(world.scene.face_count(), 8);
        assert_eq!(world.scene.shape_faces(1), 4..4);
        assert_eq!(world.scene.shape(0).material, Some(0));
        assert_eq!(world.scene.shape(2).material, None);
        // Placed at z = 5
        assert!((world.scene.bounds().min.z - 0.0).abs() < 1e-12);
        assert!((world.scene.triangle(0)[0].z - 5.0).abs() < 1e-12);

        assert!(world.materials.get(0).is_some());
        assert!(world.materials.get(1).is_none());
        assert_eq!(world.lights.total_ray_count(), 10);
        assert_eq!(world.lights.source_count(), 2);

        assert_eq!(world.cameras.len(), 2);
        let camera = world.cameras[0].as_ref().unwrap();
        assert_eq!(camera.output, dir.join("out/a.png"));
        assert!(world.cameras[1].is_none());

        assert_eq!(world.environment.radiance(DVec3::Z), DVec3::splat(0.5));
        assert_eq!(world.light_trace_options().threads, 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_environment_is_fatal() {
        let job = JobConfig::from_json_str(
            r#"{"environment": {"path": "no_such_panorama.exr"}}"#,
            std::env::temp_dir(),
        )
        .unwrap();
        assert!(matches!(World::build(&job), Err(WorldError::Environment(_))));
    }
}
