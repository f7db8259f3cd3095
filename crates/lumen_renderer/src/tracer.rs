//! Path tracing state machine.
//!
//! A path starts with the sample's ray and power, normally outside every
//! medium. Each bounce queries the intersector, attenuates the power over
//! the segment if the path is inside a medium, scatters, and moves the
//! origin a small offset along the new direction. A path ends when it
//! escapes, when its power or direction vanishes, or with an error.

use lumen_core::{Color, FaceOrientation, RenderSettings, Scene, ShapeCursor};
use lumen_math::{DVec3, Ray};
use rand::RngCore;
use thiserror::Error;

use crate::intersect::Intersector;
use crate::material::{Interaction, MaterialTable, ScatterError};
use crate::stats::RenderStats;

/// Errors that discard a single path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    #[error(transparent)]
    Scatter(#[from] ScatterError),

    #[error("Path reached the bounce ceiling ({bounces})")]
    BounceOverflow { bounces: u32 },
}

pub type TraceResult<T> = Result<T, TraceError>;

/// Fixed parameters of the tracing loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceConfig {
    /// Bounce count at which a path is abandoned.
    pub max_bounces: u32,
    /// Distance the origin moves along a scattered direction.
    pub ray_offset: f64,
    /// Length of the closing segment of an escaped path's polyline.
    pub terminal_length: f64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self::from(&RenderSettings::default())
    }
}

impl From<&RenderSettings> for TraceConfig {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            max_bounces: settings.max_bounces,
            ray_offset: settings.ray_offset,
            terminal_length: settings.terminal_length,
        }
    }
}

/// How a path ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathOutcome {
    /// Left the scene along `ray` carrying `power`.
    Escaped { ray: Ray, power: Color, bounces: u32 },
    /// Lost all its power, or was absorbed at a surface.
    Absorbed { bounces: u32 },
}

impl PathOutcome {
    pub fn bounces(&self) -> u32 {
        match *self {
            PathOutcome::Escaped { bounces, .. } | PathOutcome::Absorbed { bounces } => bounces,
        }
    }
}

/// Per-worker mutable state threaded through every trace.
#[derive(Debug, Clone, Default)]
pub struct TraceContext {
    pub cursor: ShapeCursor,
    pub stats: RenderStats,
}

/// Traces paths through a scene. Shared read-only between workers.
pub struct PathTracer<'a> {
    scene: &'a Scene,
    intersector: &'a dyn Intersector,
    materials: &'a MaterialTable,
    config: TraceConfig,
}

impl<'a> PathTracer<'a> {
    pub fn new(
        scene: &'a Scene,
        intersector: &'a dyn Intersector,
        materials: &'a MaterialTable,
        config: TraceConfig,
    ) -> Self {
        Self {
            scene,
            intersector,
            materials,
            config,
        }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn intersector(&self) -> &'a dyn Intersector {
        self.intersector
    }

    /// Follow one path that starts outside every medium.
    ///
    /// When `polyline` is given it receives the start point, every surface
    /// point, and for an escaped path a final point `terminal_length` out.
    pub fn trace(
        &self,
        ray: Ray,
        power: Color,
        ctx: &mut TraceContext,
        rng: &mut dyn RngCore,
        polyline: Option<&mut Vec<DVec3>>,
    ) -> TraceResult<PathOutcome> {
        self.trace_from(ray, power, false, ctx, rng, polyline)
    }

    /// [`trace`](Self::trace) for a path whose start lies inside the medium
    /// of the first shape it hits when `in_medium` is set.
    pub fn trace_from(
        &self,
        ray: Ray,
        power: Color,
        in_medium: bool,
        ctx: &mut TraceContext,
        rng: &mut dyn RngCore,
        mut polyline: Option<&mut Vec<DVec3>>,
    ) -> TraceResult<PathOutcome> {
        let mut ray = ray;
        let mut power = power;
        let mut in_medium = in_medium;
        let mut bounces = 0u32;

        ctx.stats.paths += 1;
        if let Some(points) = polyline.as_deref_mut() {
            points.push(ray.origin);
        }

        loop {
            let Some(hit) = self.intersector.intersect(&ray) else {
                if let Some(points) = polyline.as_deref_mut() {
                    points.push(ray.at(self.config.terminal_length));
                }
                ctx.stats.escaped += 1;
                return Ok(PathOutcome::Escaped {
                    ray,
                    power,
                    bounces,
                });
            };

            bounces += 1;
            ctx.stats.intersections += 1;
            if bounces >= self.config.max_bounces {
                ctx.stats.bounce_overflows += 1;
                return Err(TraceError::BounceOverflow { bounces });
            }

            let point = ray.at(hit.t);
            let shape = self
                .scene
                .resolve_shape(hit.face, &mut ctx.cursor)
                .map(|s| self.scene.shape(s));
            let material = shape.and_then(|s| s.material);
            let orientation = shape.map_or(FaceOrientation::Auto, |s| s.orientation);

            if in_medium {
                self.materials.volume_attenuate(material, &mut power, hit.t);
            }

            let interaction = Interaction {
                orientation,
                shading_normal: self.scene.shading_normal(hit.face, hit.u, hit.v),
                flat_normal: self.scene.flat_normal(hit.face),
                incident: ray.direction,
            };
            let direction = match self.materials.scatter(
                material,
                &interaction,
                &mut in_medium,
                &mut power,
                rng,
            ) {
                Ok(direction) => direction,
                Err(e) => {
                    ctx.stats.scatter_errors += 1;
                    return Err(e.into());
                }
            };

            if let Some(points) = polyline.as_deref_mut() {
                points.push(point);
            }

            if direction == DVec3::ZERO || power == Color::ZERO {
                ctx.stats.absorbed += 1;
                return Ok(PathOutcome::Absorbed { bounces });
            }

            ray = Ray::new(point, direction).advanced(self.config.ray_offset);
        }
    }
}
