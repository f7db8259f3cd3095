//! Camera for primary ray generation.
//!
//! The image plane spans `[-horz_range, horz_range]` along the horizontal
//! axis and `[-vert_range, vert_range]` along the vertical one. Row 0 is the
//! top of the image (`+vert`). Column 0 is the left as seen looking along the
//! eye direction, which is the `+horz` side of a right-handed frame.

use std::path::PathBuf;

use lumen_core::CameraConfig;
use lumen_math::{complete_frame, DVec3, FrameAxes, Ray};
use rand::RngCore;
use thiserror::Error;

use crate::sampling::gen_f64;

/// Errors that invalidate a camera entry.
#[derive(Error, Debug, PartialEq)]
pub enum CameraError {
    #[error("Camera needs two non-parallel axes among eye_dir, horz_dir and vert_dir")]
    DegenerateAxes,

    #[error("Camera image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Camera ranges must be positive (got {horz} x {vert})")]
    InvalidRange { horz: f64, vert: f64 },
}

pub type CameraResult<T> = Result<T, CameraError>;

/// How primary rays leave the image plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Every ray travels along the eye direction.
    Parallel,
    /// Rays start at the camera origin and pass through a plane at `far`.
    Perspective { far: f64 },
}

/// A camera and the image it produces.
#[derive(Debug, Clone)]
pub struct Camera {
    origin: DVec3,
    horz: DVec3,
    vert: DVec3,
    eye: DVec3,
    width: u32,
    height: u32,
    horz_range: f64,
    vert_range: f64,
    projection: Projection,
    passes: u32,
    output: PathBuf,
}

fn given(v: Option<[f64; 3]>) -> Option<DVec3> {
    v.map(DVec3::from_array).filter(|v| *v != DVec3::ZERO)
}

impl Camera {
    pub fn from_config(config: &CameraConfig) -> CameraResult<Self> {
        if config.pixel_width == 0 || config.pixel_height == 0 {
            return Err(CameraError::EmptyImage {
                width: config.pixel_width,
                height: config.pixel_height,
            });
        }
        if !(config.horz_range > 0.0 && config.vert_range > 0.0) {
            return Err(CameraError::InvalidRange {
                horz: config.horz_range,
                vert: config.vert_range,
            });
        }

        let axes = FrameAxes {
            x: given(config.horz_dir),
            y: given(config.vert_dir),
            z: given(config.eye_dir),
        };
        // The eye direction is kept exact when given, otherwise the vertical
        let primary = if axes.z.is_some() { 2 } else { 1 };
        // With all three given, vert_dir is ignored and rebuilt as eye x horz
        let [horz, vert, eye] =
            complete_frame(axes, primary).ok_or(CameraError::DegenerateAxes)?;

        let projection = if config.is_parallel() {
            Projection::Parallel
        } else {
            Projection::Perspective { far: config.far }
        };

        Ok(Self {
            origin: DVec3::from_array(config.origin),
            horz,
            vert,
            eye,
            width: config.pixel_width,
            height: config.pixel_height,
            horz_range: config.horz_range,
            vert_range: config.vert_range,
            projection,
            passes: config.pass,
            output: config.output_filename.clone(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    /// Output path as written in the job file.
    pub fn output(&self) -> &PathBuf {
        &self.output
    }

    /// Unit axes: horizontal, vertical, eye.
    pub fn axes(&self) -> [DVec3; 3] {
        [self.horz, self.vert, self.eye]
    }

    /// Pixel footprint on the image plane (horizontal, vertical).
    pub fn footprint(&self) -> (f64, f64) {
        (
            2.0 * self.horz_range / self.width as f64,
            2.0 * self.vert_range / self.height as f64,
        )
    }

    /// Ray through an image-plane position given in plane coordinates.
    fn ray_through(&self, h: f64, v: f64) -> Ray {
        let offset = self.horz * h + self.vert * v;
        match self.projection {
            Projection::Parallel => Ray::new(self.origin + offset, self.eye),
            Projection::Perspective { far } => {
                let direction = (self.eye * far + offset).normalize_or_zero();
                Ray::new(self.origin, direction)
            }
        }
    }

    /// Plane coordinates of a pixel centre.
    fn pixel_center(&self, col: u32, row: u32) -> (f64, f64) {
        let (fh, fv) = self.footprint();
        (
            self.horz_range - (col as f64 + 0.5) * fh,
            self.vert_range - (row as f64 + 0.5) * fv,
        )
    }

    /// Ray through the centre of a pixel.
    pub fn primary_ray(&self, col: u32, row: u32) -> Ray {
        let (h, v) = self.pixel_center(col, row);
        self.ray_through(h, v)
    }

    /// Ray through a uniformly jittered point of a pixel.
    pub fn jittered_ray(&self, col: u32, row: u32, rng: &mut dyn RngCore) -> Ray {
        let (fh, fv) = self.footprint();
        let (h, v) = self.pixel_center(col, row);
        let h = h + (gen_f64(rng) - 0.5) * fh;
        let v = v + (gen_f64(rng) - 0.5) * fv;
        self.ray_through(h, v)
    }

    /// Centre rays of every pixel, row-major.
    pub fn primary_rays(&self) -> Vec<Ray> {
        (0..self.height)
            .flat_map(|row| (0..self.width).map(move |col| self.primary_ray(col, row)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config() -> CameraConfig {
        CameraConfig {
            origin: [0.0, 0.0, -5.0],
            eye_dir: Some([0.0, 0.0, 1.0]),
            horz_dir: None,
            vert_dir: Some([0.0, 1.0, 0.0]),
            pixel_width: 4,
            pixel_height: 2,
            horz_range: 2.0,
            vert_range: 1.0,
            far: 1.0,
            pass: 3,
            projection_mode: "parallel".to_string(),
            output_filename: PathBuf::from("out.png"),
        }
    }

    fn approx(a: DVec3, b: DVec3) -> bool {
        (a - b).length() < 1e-12
    }

    #[test]
    fn test_frame_from_eye_and_vert() {
        let camera = Camera::from_config(&config()).unwrap();
        let [h, v, e] = camera.axes();
        assert!(approx(e, DVec3::Z));
        assert!(approx(v, DVec3::Y));
        // x = y cross z
        assert!(approx(h, DVec3::X));
        assert_eq!(camera.passes(), 3);
        assert_eq!(camera.pixel_count(), 8);
    }

    #[test]
    fn test_parallel_pixel_centres() {
        let camera = Camera::from_config(&config()).unwrap();
        assert_eq!(camera.footprint(), (1.0, 1.0));

        let top_left = camera.primary_ray(0, 0);
        assert!(approx(top_left.origin, DVec3::new(1.5, 0.5, -5.0)));
        assert!(approx(top_left.direction, DVec3::Z));

        let bottom_right = camera.primary_ray(3, 1);
        assert!(approx(bottom_right.origin, DVec3::new(-1.5, -0.5, -5.0)));

        let rays = camera.primary_rays();
        assert_eq!(rays.len(), 8);
        assert_eq!(rays[7], bottom_right);
    }

    #[test]
    fn test_perspective_rays_leave_origin() {
        let mut cfg = config();
        cfg.projection_mode = "perspective".to_string();
        cfg.far = 2.0;
        let camera = Camera::from_config(&cfg).unwrap();
        assert_eq!(camera.projection(), Projection::Perspective { far: 2.0 });

        let ray = camera.primary_ray(3, 0);
        assert!(approx(ray.origin, DVec3::new(0.0, 0.0, -5.0)));
        let expected = DVec3::new(-1.5, 0.5, 2.0).normalize();
        assert!(approx(ray.direction, expected));
    }

    #[test]
    fn test_jitter_stays_in_pixel() {
        let camera = Camera::from_config(&config()).unwrap();
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..1000 {
            let ray = camera.jittered_ray(1, 0, &mut rng);
            assert!(ray.origin.x >= 0.0 && ray.origin.x <= 1.0);
            assert!(ray.origin.y >= 0.0 && ray.origin.y <= 1.0);
        }
    }

    #[test]
    fn test_column_zero_on_positive_horz_side() {
        let mut cfg = config();
        cfg.pixel_height = 4;
        cfg.horz_range = 2.0;
        cfg.vert_range = 2.0;
        let camera = Camera::from_config(&cfg).unwrap();
        let [h, v, _] = camera.axes();

        let first = camera.primary_ray(0, 0).origin - DVec3::from_array(cfg.origin);
        let last = camera.primary_ray(3, 3).origin - DVec3::from_array(cfg.origin);
        assert!(first.dot(h) > 0.0 && first.dot(v) > 0.0);
        assert!(last.dot(h) < 0.0 && last.dot(v) < 0.0);
    }

    #[test]
    fn test_three_axes_rebuild_vert() {
        // A left-handed triple is turned right-handed by flipping vert
        let mut cfg = config();
        cfg.horz_dir = Some([-1.0, 0.0, 0.0]);
        let camera = Camera::from_config(&cfg).unwrap();
        let [h, v, e] = camera.axes();
        assert!(approx(h, -DVec3::X));
        assert!(approx(v, -DVec3::Y));
        assert!(approx(e, DVec3::Z));

        // The given vert only matters when another axis is missing
        cfg.vert_dir = Some([0.3, 0.0, 0.0]);
        let [_, v2, _] = Camera::from_config(&cfg).unwrap().axes();
        assert!(approx(v2, -DVec3::Y));
    }

    #[test]
    fn test_vert_and_horz_only() {
        let mut cfg = config();
        cfg.eye_dir = Some([0.0, 0.0, 0.0]);
        cfg.horz_dir = Some([1.0, 0.0, 0.0]);
        let camera = Camera::from_config(&cfg).unwrap();
        let [_, _, e] = camera.axes();
        assert!(approx(e, DVec3::Z));
    }

    #[test]
    fn test_invalid_cameras() {
        let mut cfg = config();
        cfg.vert_dir = None;
        assert_eq!(Camera::from_config(&cfg).unwrap_err(), CameraError::DegenerateAxes);

        let mut cfg = config();
        cfg.vert_dir = Some([0.0, 0.0, 2.0]);
        assert_eq!(Camera::from_config(&cfg).unwrap_err(), CameraError::DegenerateAxes);

        let mut cfg = config();
        cfg.pixel_width = 0;
        assert!(matches!(
            Camera::from_config(&cfg),
            Err(CameraError::EmptyImage { .. })
        ));

        let mut cfg = config();
        cfg.vert_range = 0.0;
        assert!(matches!(
            Camera::from_config(&cfg),
            Err(CameraError::InvalidRange { .. })
        ));
    }
}
