//! Camera rendering.
//!
//! Passes are split across a fixed pool of workers by pass index modulo the
//! worker count. Every worker owns an RNG seeded from the master seed, a
//! [`TraceContext`] and a full-size accumulation buffer, so no pixel is ever
//! written by two threads. The buffers are summed when the workers join.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use lumen_core::{Color, Environment, RenderSettings};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

use crate::camera::Camera;
use crate::output::ImageBuffer;
use crate::stats::RenderStats;
use crate::tracer::{PathOutcome, PathTracer, TraceContext};

/// How often the polling loop wakes up to check for completion.
const POLL_TICK: Duration = Duration::from_millis(10);

/// Errors that abort a render.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type RenderResult<T> = Result<T, RenderError>;

/// Worker count for a settings block: the configured one, or the machine's
/// available parallelism.
pub fn worker_count(settings: &RenderSettings) -> usize {
    settings
        .threads
        .filter(|&n| n > 0)
        .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()))
}

/// One worker's private accumulation.
struct Accumulator {
    sum: Vec<Color>,
    count: Vec<u32>,
    ctx: TraceContext,
}

impl Accumulator {
    fn new(pixels: usize) -> Self {
        Self {
            sum: vec![Color::ZERO; pixels],
            count: vec![0; pixels],
            ctx: TraceContext::default(),
        }
    }

    fn merge(&mut self, other: Accumulator) {
        for (a, b) in self.sum.iter_mut().zip(other.sum) {
            *a += b;
        }
        for (a, b) in self.count.iter_mut().zip(other.count) {
            *a += b;
        }
        self.ctx.stats.merge(&other.ctx.stats);
    }
}

/// Renders cameras with a shared tracer and environment.
pub struct RenderOrchestrator<'a> {
    tracer: PathTracer<'a>,
    environment: &'a Environment,
    threads: usize,
    seed: u64,
    progress_interval: Duration,
}

impl<'a> RenderOrchestrator<'a> {
    pub fn new(tracer: PathTracer<'a>, environment: &'a Environment, settings: &RenderSettings) -> Self {
        Self {
            tracer,
            environment,
            threads: worker_count(settings),
            seed: settings.seed,
            progress_interval: Duration::from_millis(settings.progress_interval_ms.max(1)),
        }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Render every pass of `camera`.
    pub fn render(&self, camera: &Camera) -> RenderResult<(ImageBuffer, RenderStats)> {
        let start = Instant::now();
        let (width, height) = (camera.width(), camera.height());
        let pixels = camera.pixel_count();

        // Pixels whose centre ray misses everything show the environment directly
        let primary = camera.primary_rays();
        let covered: Vec<bool> = self
            .tracer
            .intersector()
            .intersect_batch(&primary)
            .iter()
            .map(Option::is_some)
            .collect();
        let covered_count = covered.iter().filter(|&&c| c).count();
        log::info!(
            "Camera {}x{}: {} of {} pixels see geometry, {} passes on {} threads",
            width,
            height,
            covered_count,
            pixels,
            camera.passes(),
            self.threads
        );

        let mut master = StdRng::seed_from_u64(self.seed);
        let seeds: Vec<u64> = (0..self.threads).map(|_| master.next_u64()).collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()?;
        let completed = AtomicUsize::new(0);
        let total = camera.passes() as usize * covered_count;

        let accumulated = thread::scope(|scope| {
            let handle = scope.spawn(|| {
                pool.install(|| {
                    seeds
                        .par_iter()
                        .enumerate()
                        .map(|(worker, &seed)| {
                            self.render_worker(camera, &covered, worker, seed, &completed)
                        })
                        .reduce_with(|mut a, b| {
                            a.merge(b);
                            a
                        })
                })
            });
            poll_progress(&handle, &completed, total, self.progress_interval);
            match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        });
        let mut accumulated = accumulated.unwrap_or_else(|| Accumulator::new(pixels));

        let mut image = ImageBuffer::new(width, height);
        for (index, pixel) in image.pixels.iter_mut().enumerate() {
            *pixel = if !covered[index] {
                self.environment.radiance(primary[index].direction)
            } else if accumulated.count[index] > 0 {
                accumulated.sum[index] / accumulated.count[index] as f64
            } else {
                Color::ZERO
            };
        }

        let stats = &mut accumulated.ctx.stats;
        stats.intersections += covered_count as u64;
        stats.elapsed = start.elapsed();
        log::info!("Camera done: {}", stats);
        Ok((image, accumulated.ctx.stats))
    }

    fn render_worker(
        &self,
        camera: &Camera,
        covered: &[bool],
        worker: usize,
        seed: u64,
        completed: &AtomicUsize,
    ) -> Accumulator {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut acc = Accumulator::new(camera.pixel_count());
        let width = camera.width();

        for _pass in (worker..camera.passes() as usize).step_by(self.threads) {
            for (index, _) in covered.iter().enumerate().filter(|(_, &c)| c) {
                let (col, row) = (index as u32 % width, index as u32 / width);
                let ray = camera.jittered_ray(col, row, &mut rng);

                match self.tracer.trace(ray, Color::ONE, &mut acc.ctx, &mut rng, None) {
                    Ok(PathOutcome::Escaped { ray, power, .. }) => {
                        acc.sum[index] += self.environment.radiance(ray.direction) * power;
                        acc.count[index] += 1;
                    }
                    Ok(PathOutcome::Absorbed { .. }) => acc.count[index] += 1,
                    Err(e) => log::trace!("Discarded path at pixel ({}, {}): {}", col, row, e),
                }
                completed.fetch_add(1, Ordering::Relaxed);
            }
        }
        acc
    }
}

/// Log progress every `interval` until the workers behind `handle` finish.
pub(crate) fn poll_progress<T>(
    handle: &thread::ScopedJoinHandle<'_, T>,
    completed: &AtomicUsize,
    total: usize,
    interval: Duration,
) {
    let mut last = Instant::now();
    while !handle.is_finished() {
        thread::sleep(POLL_TICK);
        if last.elapsed() >= interval {
            let done = completed.load(Ordering::Relaxed);
            log::info!(
                "Progress {:.1}% ({}/{})",
                100.0 * done as f64 / total.max(1) as f64,
                done,
                total
            );
            last = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::TriangleBvh;
    use crate::material::{Material, MaterialTable};
    use crate::tracer::TraceConfig;
    use lumen_core::{CameraConfig, FaceOrientation, MaterialConfig, Mesh, Scene, ShapeInfo};
    use lumen_math::DVec3;
    use std::path::PathBuf;

    fn camera(passes: u32) -> Camera {
        Camera::from_config(&CameraConfig {
            origin: [0.0, 0.0, -5.0],
            eye_dir: Some([0.0, 0.0, 1.0]),
            horz_dir: None,
            vert_dir: Some([0.0, 1.0, 0.0]),
            pixel_width: 4,
            pixel_height: 4,
            horz_range: 2.0,
            vert_range: 2.0,
            far: 1.0,
            pass: passes,
            projection_mode: "parallel".to_string(),
            output_filename: PathBuf::from("out.png"),
        })
        .unwrap()
    }

    /// Quad covering x < 0 at z = 0; the camera sees it on the right half.
    fn negative_x_scene() -> Scene {
        let mesh = Mesh::new(
            vec![
                DVec3::new(-3.0, -3.0, 0.0),
                DVec3::new(0.0, -3.0, 0.0),
                DVec3::new(0.0, 3.0, 0.0),
                DVec3::new(-3.0, 3.0, 0.0),
            ],
            vec![0, 1, 2, 0, 2, 3],
            None,
        );
        let mut scene = Scene::new();
        scene.add_shape(
            &mesh,
            ShapeInfo {
                name: "quad".to_string(),
                material: Some(0),
                orientation: FaceOrientation::Auto,
            },
        );
        scene
    }

    fn settings(threads: usize) -> RenderSettings {
        RenderSettings {
            threads: Some(threads),
            ..RenderSettings::default()
        }
    }

    #[test]
    fn test_worker_count() {
        assert_eq!(worker_count(&settings(3)), 3);
        assert!(worker_count(&RenderSettings::default()) >= 1);
        assert!(worker_count(&RenderSettings {
            threads: Some(0),
            ..RenderSettings::default()
        }) >= 1);
    }

    #[test]
    fn test_render_mirror_and_background() {
        let scene = negative_x_scene();
        let bvh = TriangleBvh::new(&scene);
        // Perfect mirror with a 50% weight: reflected paths carry half the power
        let mirror = MaterialConfig {
            name: "mirror".to_string(),
            roughness_alpha: 0.0,
            constant_ref_ratio: 0.5,
            ior: 1.0,
            transmittance: 0.0,
            diffuse_color: None,
            absorption_coef: None,
        };
        let materials = MaterialTable::new(vec![Some(Material::from_config(&mirror).unwrap())]);
        let tracer = PathTracer::new(&scene, &bvh, &materials, TraceConfig::default());
        let environment = Environment::uniform(Color::new(1.0, 2.0, 3.0));
        let orchestrator = RenderOrchestrator::new(tracer, &environment, &settings(2));

        let (image, stats) = orchestrator.render(&camera(3)).unwrap();

        for y in 0..4 {
            // Left half looks past the quad
            for x in 0..2 {
                assert_eq!(image.get(x, y), Color::new(1.0, 2.0, 3.0));
            }
            // Right half: mirror reflects half the environment back at the camera
            for x in 2..4 {
                assert!((image.get(x, y) - Color::new(0.5, 1.0, 1.5)).length() < 1e-12);
            }
        }
        assert_eq!(stats.paths, 3 * 8);
        assert_eq!(stats.escaped, 3 * 8);
        assert_eq!(stats.errors(), 0);
    }

    #[test]
    fn test_same_seed_same_image() {
        let scene = negative_x_scene();
        let bvh = TriangleBvh::new(&scene);
        let diffuse = MaterialConfig {
            name: "paint".to_string(),
            roughness_alpha: 0.0,
            constant_ref_ratio: 0.0,
            ior: 1.5,
            transmittance: 0.0,
            diffuse_color: Some([0.5, 0.5, 0.5]),
            absorption_coef: None,
        };
        let materials = MaterialTable::new(vec![Some(Material::from_config(&diffuse).unwrap())]);
        let environment = Environment::uniform(Color::ONE);

        let render = || {
            let tracer = PathTracer::new(&scene, &bvh, &materials, TraceConfig::default());
            RenderOrchestrator::new(tracer, &environment, &settings(2))
                .render(&camera(4))
                .unwrap()
                .0
        };
        let first = render();
        let second = render();
        for (a, b) in first.pixels.iter().zip(&second.pixels) {
            assert!((*a - *b).length() < 1e-12);
        }
    }

    #[test]
    fn test_zero_passes() {
        let scene = negative_x_scene();
        let bvh = TriangleBvh::new(&scene);
        let materials = MaterialTable::default();
        let tracer = PathTracer::new(&scene, &bvh, &materials, TraceConfig::default());
        let environment = Environment::uniform(Color::ONE);
        let orchestrator = RenderOrchestrator::new(tracer, &environment, &settings(2));

        let (image, stats) = orchestrator.render(&camera(0)).unwrap();
        assert_eq!(image.get(0, 0), Color::ONE);
        assert_eq!(image.get(3, 0), Color::ZERO);
        assert_eq!(stats.paths, 0);
    }
}
