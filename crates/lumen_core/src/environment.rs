//! Environment lookup for escaped paths.
//!
//! Either a latitude/longitude panorama oriented by a zenith and a center
//! direction, or a constant radiance.

use std::f64::consts::PI;
use std::path::Path;

use lumen_math::DVec3;
use thiserror::Error;

use crate::job::EnvironmentConfig;
use crate::Color;

/// Errors that can occur while loading an environment map.
#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Environment image {0} is empty")]
    Empty(String),

    #[error("Environment axes are degenerate (zenith and center must be non-parallel)")]
    DegenerateAxes,
}

pub type EnvironmentResult<T> = Result<T, EnvironmentError>;

const DIRECTION_TOLERANCE: f64 = 2.3283064365386963e-10;

#[derive(Debug, Clone)]
struct Panorama {
    width: usize,
    height: usize,
    pixels: Vec<Color>,
    zenith: DVec3,
    center: DVec3,
    equator: DVec3,
}

/// Direction to radiance lookup.
#[derive(Debug, Clone)]
pub struct Environment {
    panorama: Option<Panorama>,
    constant: Color,
}

impl Default for Environment {
    fn default() -> Self {
        Self::uniform(Color::ONE)
    }
}

impl Environment {
    /// Same radiance in every direction.
    pub fn uniform(radiance: Color) -> Self {
        Self {
            panorama: None,
            constant: radiance,
        }
    }

    /// Panorama from linear RGB pixels (row-major, row 0 at the zenith side).
    pub fn from_pixels(
        width: usize,
        height: usize,
        pixels: Vec<Color>,
        multiplier: f64,
        zenith_dir: DVec3,
        center_dir: DVec3,
    ) -> EnvironmentResult<Self> {
        if width == 0 || height == 0 || pixels.len() != width * height {
            return Err(EnvironmentError::Empty(format!("{}x{}", width, height)));
        }
        let zenith = zenith_dir
            .try_normalize()
            .ok_or(EnvironmentError::DegenerateAxes)?;
        let center = (center_dir - zenith * center_dir.dot(zenith))
            .try_normalize()
            .ok_or(EnvironmentError::DegenerateAxes)?;
        let equator = center.cross(zenith);

        let pixels: Vec<Color> = pixels.into_iter().map(|p| p * multiplier).collect();
        let max = pixels.iter().fold(Color::ZERO, |acc, p| acc.max(*p));
        log::debug!("Environment {}x{}, rgb max ({}, {}, {})", width, height, max.x, max.y, max.z);

        Ok(Self {
            panorama: Some(Panorama {
                width,
                height,
                pixels,
                zenith,
                center,
                equator,
            }),
            constant: Color::ZERO,
        })
    }

    /// Load a panorama through the `image` crate (EXR, HDR, PNG, ...).
    pub fn load(
        path: impl AsRef<Path>,
        multiplier: f64,
        zenith_dir: DVec3,
        center_dir: DVec3,
    ) -> EnvironmentResult<Self> {
        let path = path.as_ref();
        log::info!("Loading environment {}", path.display());
        let rgb = image::open(path)?.into_rgb32f();
        let (width, height) = (rgb.width() as usize, rgb.height() as usize);
        let pixels = rgb
            .pixels()
            .map(|p| Color::new(p.0[0] as f64, p.0[1] as f64, p.0[2] as f64))
            .collect();
        Self::from_pixels(width, height, pixels, multiplier, zenith_dir, center_dir).map_err(
            |e| match e {
                EnvironmentError::Empty(_) => EnvironmentError::Empty(path.display().to_string()),
                other => other,
            },
        )
    }

    /// Build from a job entry; paths resolve against `base_dir`.
    pub fn from_config(config: &EnvironmentConfig, base_dir: &Path) -> EnvironmentResult<Self> {
        match (&config.path, config.constant) {
            (Some(path), _) => Self::load(
                base_dir.join(path),
                config.multiplier,
                DVec3::from_array(config.zenith_dir),
                DVec3::from_array(config.center_dir),
            ),
            (None, Some(constant)) => Ok(Self::uniform(Color::from_array(constant) * config.multiplier)),
            (None, None) => Ok(Self::uniform(Color::splat(config.multiplier))),
        }
    }

    /// Radiance arriving from direction `dir` (travel direction of the escaped ray).
    pub fn radiance(&self, dir: DVec3) -> Color {
        let Some(pano) = &self.panorama else {
            return self.constant;
        };

        let dz = pano.zenith.dot(dir);
        let dy = pano.equator.dot(dir);
        let dx = pano.center.dot(dir);
        let ty = (dx * dx + dy * dy).sqrt();

        // Elevation in [-pi/2, pi/2], azimuth in [-pi, pi]
        let (v, u) = if ty < DIRECTION_TOLERANCE {
            (if dz < 0.0 { -PI / 2.0 } else { PI / 2.0 }, 0.0)
        } else {
            (dz.atan2(ty), dy.atan2(dx))
        };

        let px = ((u / (2.0 * PI) + 0.5) * pano.width as f64).floor();
        let py = ((-v / PI + 0.5) * pano.height as f64).floor();
        let px = (px.max(0.0) as usize).min(pano.width - 1);
        let py = (py.max(0.0) as usize).min(pano.height - 1);

        pano.pixels[py * pano.width + px]
    }
}
