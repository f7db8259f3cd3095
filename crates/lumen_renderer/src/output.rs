//! Image buffer and image file output.
//!
//! Pixels are linear RGB. Files ending in `.exr` are written as linear
//! 32-bit float; everything else gets a 1/2.2 gamma and 8 bits per channel.

use std::path::{Path, PathBuf};

use image::{Rgb, Rgb32FImage, RgbImage};
use lumen_core::Color;
use thiserror::Error;

/// Display gamma applied to 8-bit output.
pub const GAMMA: f64 = 2.2;

/// Errors while writing an image.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to create {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Failed to write {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type OutputResult<T> = Result<T, OutputError>;

/// Create the parent directory of an output file.
pub(crate) fn create_parent(path: &Path) -> OutputResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| OutputError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Apply display gamma and quantise one channel to 8 bits.
#[inline]
pub fn to_ldr(linear: f64) -> u8 {
    if linear.is_nan() || linear <= 0.0 {
        return 0;
    }
    (linear.powf(1.0 / GAMMA) * 255.0).clamp(0.0, 255.0) as u8
}

/// Row-major linear RGB image, row 0 at the top.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Color>,
}

impl ImageBuffer {
    /// Create a new image buffer filled with black.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Color::ZERO; width as usize * height as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Color {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        self.pixels[(y * self.width + x) as usize] = color;
    }

    /// Gamma-corrected 8-bit copy.
    pub fn to_rgb8(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let c = self.get(x, y);
            Rgb([to_ldr(c.x), to_ldr(c.y), to_ldr(c.z)])
        })
    }

    /// Linear float copy.
    pub fn to_rgb32f(&self) -> Rgb32FImage {
        Rgb32FImage::from_fn(self.width, self.height, |x, y| {
            let c = self.get(x, y);
            Rgb([c.x as f32, c.y as f32, c.z as f32])
        })
    }

    /// Write to `path`; the extension picks 8-bit or float output.
    pub fn save(&self, path: &Path) -> OutputResult<()> {
        create_parent(path)?;

        let result = if is_hdr_path(path) {
            self.to_rgb32f().save(path)
        } else {
            self.to_rgb8().save(path)
        };
        result.map_err(|source| OutputError::Image {
            path: path.to_path_buf(),
            source,
        })?;

        log::info!("Wrote {}", path.display());
        Ok(())
    }
}

fn is_hdr_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("exr"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_ldr() {
        assert_eq!(to_ldr(0.0), 0);
        assert_eq!(to_ldr(-1.0), 0);
        assert_eq!(to_ldr(f64::NAN), 0);
        assert_eq!(to_ldr(1.0), 255);
        assert_eq!(to_ldr(50.0), 255);
        // 0.5^(1/2.2) * 255 = 186.08
        assert_eq!(to_ldr(0.5), 186);
    }

    #[test]
    fn test_image_buffer_layout() {
        let mut image = ImageBuffer::new(3, 2);
        image.set(2, 1, Color::new(1.0, 0.0, 0.5));
        assert_eq!(image.pixels[5], Color::new(1.0, 0.0, 0.5));

        let ldr = image.to_rgb8();
        assert_eq!(ldr.get_pixel(2, 1).0, [255, 0, 186]);
        let hdr = image.to_rgb32f();
        assert_eq!(hdr.get_pixel(2, 1).0, [1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_save_png_and_exr() {
        let dir = std::env::temp_dir().join("lumen_renderer_output_test");
        let mut image = ImageBuffer::new(2, 2);
        image.set(0, 0, Color::splat(0.25));

        let png = dir.join("frame.png");
        image.save(&png).unwrap();
        let decoded = image::open(&png).unwrap().into_rgb8();
        assert_eq!(decoded.get_pixel(0, 0).0[0], to_ldr(0.25));

        let exr = dir.join("frame.exr");
        image.save(&exr).unwrap();
        let decoded = image::open(&exr).unwrap().into_rgb32f();
        assert_eq!(decoded.get_pixel(0, 0).0[0], 0.25);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_hdr_extension() {
        assert!(is_hdr_path(Path::new("a/b.EXR")));
        assert!(!is_hdr_path(Path::new("a/b.png")));
        assert!(!is_hdr_path(Path::new("a/exr")));
    }
}
