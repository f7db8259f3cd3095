//! Emitter tracing.
//!
//! Every ray of the light-source set is traced forward with its flux on
//! every channel, and the power that escapes the scene is tallied per
//! source. With a non-absorbing scene the escaped power must match the
//! emitted flux, which makes this the harness for energy checks.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use lumen_core::Color;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;

use crate::light::LightSourceSet;
use crate::output::{create_parent, OutputError, OutputResult};
use crate::renderer::{poll_progress, RenderResult};
use crate::stats::RenderStats;
use crate::tracer::{PathOutcome, PathTracer, TraceContext, TraceError};

/// Per-source totals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceTally {
    pub rays: u64,
    /// Sum of the emitted per-ray flux.
    pub emitted: f64,
    /// Per-channel power that left the scene.
    pub escaped: Color,
    pub absorbed: u64,
    pub errors: u64,
}

impl SourceTally {
    fn merge(&mut self, other: &SourceTally) {
        self.rays += other.rays;
        self.emitted += other.emitted;
        self.escaped += other.escaped;
        self.absorbed += other.absorbed;
        self.errors += other.errors;
    }
}

/// Vertices of one traced emitter path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TracedPath {
    /// Global ray index.
    pub index: u64,
    pub source: usize,
    pub wavelength: f64,
    pub escaped: bool,
    pub points: Vec<[f64; 3]>,
}

/// Result of tracing every emitter ray.
#[derive(Debug, Clone, Default)]
pub struct LightTraceReport {
    /// One entry per light source slot, excluded slots included.
    pub sources: Vec<SourceTally>,
    pub stats: RenderStats,
    /// Recorded paths, ordered by global index.
    pub paths: Vec<TracedPath>,
}

impl LightTraceReport {
    /// Escaped power summed over all sources.
    pub fn total_escaped(&self) -> Color {
        self.sources.iter().fold(Color::ZERO, |acc, s| acc + s.escaped)
    }

    pub fn total_emitted(&self) -> f64 {
        self.sources.iter().map(|s| s.emitted).sum()
    }

    fn merge(&mut self, other: LightTraceReport) {
        for (a, b) in self.sources.iter_mut().zip(&other.sources) {
            a.merge(b);
        }
        self.stats.merge(&other.stats);
        self.paths.extend(other.paths);
    }

    /// Write the recorded paths as JSON.
    pub fn write_paths(&self, path: &Path) -> OutputResult<()> {
        create_parent(path)?;
        let file = File::create(path).map_err(|source| OutputError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.paths).map_err(|source| {
            OutputError::Json {
                path: path.to_path_buf(),
                source,
            }
        })?;
        log::info!("Wrote {} traced paths to {}", self.paths.len(), path.display());
        Ok(())
    }
}

/// Settings of an emitter trace.
#[derive(Debug, Clone, Copy)]
pub struct LightTraceOptions {
    pub threads: usize,
    pub seed: u64,
    /// Global indices below this get their polyline recorded.
    pub trace_limit: u64,
    pub progress_interval: Duration,
}

/// Trace every ray of `lights` through `tracer`.
///
/// Global index `i` goes to worker `i % threads`. Each worker has its own
/// light cursor, so rejection counters of different workers never overlap.
pub fn trace_lights(
    tracer: &PathTracer<'_>,
    lights: &LightSourceSet,
    options: LightTraceOptions,
) -> RenderResult<LightTraceReport> {
    let start = Instant::now();
    let threads = options.threads.max(1);
    let total = lights.total_ray_count();
    log::info!(
        "Tracing {} rays from {} light sources on {} threads",
        total,
        lights.source_count(),
        threads
    );

    let mut master = StdRng::seed_from_u64(options.seed);
    let seeds: Vec<u64> = (0..threads).map(|_| master.next_u64()).collect();

    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    let completed = AtomicUsize::new(0);

    let report = thread::scope(|scope| {
        let handle = scope.spawn(|| {
            pool.install(|| {
                seeds
                    .par_iter()
                    .enumerate()
                    .map(|(worker, &seed)| {
                        trace_worker(tracer, lights, &options, worker, threads, seed, &completed)
                    })
                    .reduce_with(|mut a, b| {
                        a.merge(b);
                        a
                    })
            })
        });
        poll_progress(&handle, &completed, total as usize, options.progress_interval);
        match handle.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    });

    let mut report = report.unwrap_or_default();
    report.paths.sort_by_key(|p| p.index);
    report.stats.elapsed = start.elapsed();

    for (index, tally) in report.sources.iter().enumerate().filter(|(_, t)| t.rays > 0) {
        log::info!(
            "Light source {}: emitted {:.6}, escaped ({:.6}, {:.6}, {:.6}), {} absorbed, {} errors",
            index,
            tally.emitted,
            tally.escaped.x,
            tally.escaped.y,
            tally.escaped.z,
            tally.absorbed,
            tally.errors
        );
    }
    log::info!("Light trace done: {}", report.stats);
    Ok(report)
}

fn trace_worker(
    tracer: &PathTracer<'_>,
    lights: &LightSourceSet,
    options: &LightTraceOptions,
    worker: usize,
    threads: usize,
    seed: u64,
    completed: &AtomicUsize,
) -> LightTraceReport {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut cursor = lights.cursor(worker, threads);
    let mut ctx = TraceContext::default();
    let mut report = LightTraceReport {
        sources: vec![SourceTally::default(); lights.source_count()],
        ..LightTraceReport::default()
    };

    let indices = (worker as u64..lights.total_ray_count()).step_by(threads);
    for index in indices {
        let Some(sample) = lights.sample(index, &mut cursor) else {
            continue;
        };
        let tally = &mut report.sources[sample.source];
        tally.rays += 1;
        tally.emitted += sample.flux;

        let mut points = (index < options.trace_limit).then(Vec::new);
        let outcome = tracer.trace(
            sample.ray,
            Color::splat(sample.flux),
            &mut ctx,
            &mut rng,
            points.as_mut(),
        );

        let escaped = match outcome {
            Ok(PathOutcome::Escaped { power, .. }) => {
                tally.escaped += power;
                true
            }
            Ok(PathOutcome::Absorbed { .. }) => {
                tally.absorbed += 1;
                false
            }
            Err(e) => {
                tally.errors += 1;
                if let TraceError::BounceOverflow { .. } = e {
                    log::debug!("Light ray {}: {}", index, e);
                }
                false
            }
        };

        if let Some(points) = points {
            report.paths.push(TracedPath {
                index,
                source: sample.source,
                wavelength: sample.wavelength,
                escaped,
                points: points.iter().map(|p| p.to_array()).collect(),
            });
        }
        completed.fetch_add(1, Ordering::Relaxed);
    }

    report.stats = ctx.stats;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::TriangleBvh;
    use crate::light::{DiskLight, LightSource};
    use crate::material::MaterialTable;
    use crate::tracer::TraceConfig;
    use lumen_core::{DiskShape, ParallelLightConfig, Scene};

    fn disk(num_ray: u64, total_flux: f64) -> LightSource {
        LightSource::ParallelDisk(
            DiskLight::from_config(&ParallelLightConfig {
                origin: [0.0, 0.0, 0.0],
                direction: [0.0, 0.0, 1.0],
                num_ray,
                wavelength: 550.0,
                total_flux,
                shape: DiskShape { radius: 1.0 },
            })
            .unwrap(),
        )
    }

    fn options(threads: usize, trace_limit: u64) -> LightTraceOptions {
        LightTraceOptions {
            threads,
            seed: 444,
            trace_limit,
            progress_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_empty_scene_lets_everything_escape() {
        let scene = Scene::new();
        let bvh = TriangleBvh::new(&scene);
        let materials = MaterialTable::default();
        let tracer = PathTracer::new(&scene, &bvh, &materials, TraceConfig::default());
        let lights = LightSourceSet::new(vec![Some(disk(100, 2.0)), None, Some(disk(50, 1.0))]);

        let report = trace_lights(&tracer, &lights, options(3, 5)).unwrap();

        assert_eq!(report.sources.len(), 3);
        assert_eq!(report.sources[0].rays, 100);
        assert_eq!(report.sources[1], SourceTally::default());
        assert_eq!(report.sources[2].rays, 50);
        assert!((report.total_emitted() - 3.0).abs() < 1e-9);
        assert!((report.total_escaped() - Color::splat(3.0)).length() < 1e-9);
        assert_eq!(report.stats.paths, 150);
        assert_eq!(report.stats.escaped, 150);

        // First five global indices recorded, each with a start and a terminal point
        let indices: Vec<u64> = report.paths.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        for path in &report.paths {
            assert!(path.escaped);
            assert_eq!(path.points.len(), 2);
            assert!((path.points[1][2] - 10.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_write_paths() {
        let report = LightTraceReport {
            paths: vec![TracedPath {
                index: 7,
                source: 1,
                wavelength: 550.0,
                escaped: true,
                points: vec![[0.0, 0.0, 0.0], [0.0, 0.0, 10.0]],
            }],
            ..LightTraceReport::default()
        };
        let path = std::env::temp_dir()
            .join("lumen_renderer_light_trace_test")
            .join("paths.json");
        report.write_paths(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0]["index"], 7);
        assert_eq!(value[0]["points"][1][2], 10.0);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
