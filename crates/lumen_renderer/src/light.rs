//! Light sources.
//!
//! Every emitter exposes a fixed number of rays. The set concatenates them
//! into one global index range, so a render or an emitter trace can walk
//! `0..total_ray_count()` and split it across workers however it likes.
//!
//! Two emitter kinds exist:
//!
//! - **Parallel disk**: rays along the plane normal, starting on a disk.
//!   Points come from a Halton (2, 3) sequence with rejection, driven by a
//!   counter that lives in the caller's [`LightCursor`].
//! - **Ray file**: records subsampled from a binary ray file and rescaled to
//!   a configured total flux.

use std::path::{Path, PathBuf};

use bytemuck::{Pod, Zeroable};
use lumen_core::{LightSourceConfig, ParallelLightConfig, RayFileLightConfig};
use lumen_math::{complete_frame, orthonormal_basis, DVec3, FrameAxes, Ray};
use thiserror::Error;

use crate::sampling::halton;

/// Bytes before the first record of a ray file.
pub const RAY_FILE_HEADER_SIZE: usize = 320;

/// Bytes per ray file record.
pub const RAY_FILE_RECORD_SIZE: usize = std::mem::size_of::<RayRecord>();

/// First Halton index used by disk emitters.
const DISK_HALTON_START: u64 = 10;

/// Halton base used to subsample ray files.
const RAY_FILE_HALTON_BASE: u64 = 9;

/// Errors that invalidate a light source entry.
#[derive(Error, Debug)]
pub enum LightError {
    #[error("Disk radius must be positive (got {0})")]
    InvalidRadius(f64),

    #[error("Light source emits no rays")]
    NoRays,

    #[error("Emission direction is zero")]
    ZeroDirection,

    #[error("Ray file frame needs exactly two of x_dir, y_dir and z_dir (got {0})")]
    AxisCount(usize),

    #[error("Optical axis {0:?} is not one of the given axes")]
    OpticalAxis(String),

    #[error("Ray file frame axes are degenerate")]
    DegenerateFrame,

    #[error("Failed to read ray file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Ray file {0} contains no records")]
    EmptyRayFile(PathBuf),

    #[error("Sampled rays carry no flux")]
    ZeroFlux,
}

pub type LightResult<T> = Result<T, LightError>;

/// One record of a ray file: eight little-endian `f32` values.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RayRecord {
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub flux: f32,
    pub wavelength: f32,
}

impl RayRecord {
    /// Decode one record. `bytes` must hold at least [`RAY_FILE_RECORD_SIZE`] bytes.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let words: [u32; 8] = bytemuck::pod_read_unaligned(&bytes[..RAY_FILE_RECORD_SIZE]);
        bytemuck::cast(words.map(u32::from_le))
    }
}

/// Rays along the normal of a disk.
#[derive(Debug, Clone)]
pub struct DiskLight {
    origin: DVec3,
    normal: DVec3,
    u_axis: DVec3,
    v_axis: DVec3,
    radius: f64,
    ray_count: u64,
    flux_per_ray: f64,
    wavelength: f64,
}

impl DiskLight {
    pub fn from_config(config: &ParallelLightConfig) -> LightResult<Self> {
        if !(config.shape.radius > 0.0) {
            return Err(LightError::InvalidRadius(config.shape.radius));
        }
        if config.num_ray == 0 {
            return Err(LightError::NoRays);
        }
        let normal = DVec3::from_array(config.direction)
            .try_normalize()
            .ok_or(LightError::ZeroDirection)?;
        let (u_axis, v_axis) = orthonormal_basis(normal);

        Ok(Self {
            origin: DVec3::from_array(config.origin),
            normal,
            u_axis,
            v_axis,
            radius: config.shape.radius,
            ray_count: config.num_ray,
            flux_per_ray: config.total_flux / config.num_ray as f64,
            wavelength: config.wavelength,
        })
    }

    /// Next accepted point of the (2, 3) Halton sequence inside the unit
    /// disk. Every attempt, accepted or not, advances `counter`.
    fn next_disk_point(counter: &mut u64) -> (f64, f64) {
        loop {
            let index = DISK_HALTON_START + *counter;
            *counter += 1;
            let x = (halton(index, 2) - 0.5) * 2.0;
            let y = (halton(index, 3) - 0.5) * 2.0;
            if x * x + y * y <= 1.0 {
                return (x, y);
            }
        }
    }

    fn sample(&self, counter: &mut u64) -> (Ray, f64, f64) {
        let (x, y) = Self::next_disk_point(counter);
        let start = self.origin + (self.u_axis * x + self.v_axis * y) * self.radius;
        (Ray::new(start, self.normal), self.flux_per_ray, self.wavelength)
    }
}

#[derive(Debug, Clone, Copy)]
struct SampledRay {
    ray: Ray,
    flux: f64,
    wavelength: f64,
}

/// Rays subsampled from a ray file.
#[derive(Debug, Clone)]
pub struct FileLight {
    rays: Vec<SampledRay>,
}

impl FileLight {
    /// Load and subsample a ray file. Relative paths resolve against `base_dir`.
    pub fn from_config(config: &RayFileLightConfig, base_dir: &Path) -> LightResult<Self> {
        let frame = ray_file_frame(config)?;
        let path = base_dir.join(&config.path);
        let data = std::fs::read(&path).map_err(|source| LightError::Io {
            path: path.clone(),
            source,
        })?;
        let records = parse_ray_file(&data);
        if records.is_empty() {
            return Err(LightError::EmptyRayFile(path));
        }
        Self::from_records(&records, frame, DVec3::from_array(config.origin), config.num_ray, config.total_flux)
    }

    /// Subsample `records` (given in the local `frame` at `origin`) and
    /// rescale their flux to sum to `total_flux`.
    pub fn from_records(
        records: &[RayRecord],
        frame: [DVec3; 3],
        origin: DVec3,
        num_ray: u64,
        total_flux: f64,
    ) -> LightResult<Self> {
        let count = (num_ray as usize).min(records.len());
        if count == 0 {
            return Err(LightError::NoRays);
        }
        let to_world = |v: [f32; 3]| frame[0] * v[0] as f64 + frame[1] * v[1] as f64 + frame[2] * v[2] as f64;

        let mut rays: Vec<SampledRay> = (0..count)
            .map(|i| {
                let index = ((halton(i as u64, RAY_FILE_HALTON_BASE) * records.len() as f64) as usize)
                    .min(records.len() - 1);
                let record = &records[index];
                SampledRay {
                    ray: Ray::new(
                        origin + to_world(record.position),
                        to_world(record.direction).normalize_or_zero(),
                    ),
                    flux: record.flux as f64,
                    wavelength: record.wavelength as f64,
                }
            })
            .collect();

        let sum: f64 = rays.iter().map(|r| r.flux).sum();
        if !(sum > 0.0) {
            return Err(LightError::ZeroFlux);
        }
        let ratio = total_flux / sum;
        for ray in &mut rays {
            ray.flux *= ratio;
        }

        log::debug!(
            "Ray file: {} of {} records, flux ratio {}",
            count,
            records.len(),
            ratio
        );
        Ok(Self { rays })
    }
}

/// Records after the header; a trailing partial record is ignored.
pub fn parse_ray_file(data: &[u8]) -> Vec<RayRecord> {
    data.get(RAY_FILE_HEADER_SIZE..)
        .unwrap_or_default()
        .chunks_exact(RAY_FILE_RECORD_SIZE)
        .map(RayRecord::from_le_bytes)
        .collect()
}

fn ray_file_frame(config: &RayFileLightConfig) -> LightResult<[DVec3; 3]> {
    let given = |axis: Option<[f64; 3]>| axis.map(DVec3::from_array).filter(|v| *v != DVec3::ZERO);
    let axes = FrameAxes {
        x: given(config.x_dir),
        y: given(config.y_dir),
        z: given(config.z_dir),
    };
    if axes.count() != 2 {
        return Err(LightError::AxisCount(axes.count()));
    }
    let primary = match config.optical.to_ascii_lowercase().as_str() {
        "x" if axes.x.is_some() => 0,
        "y" if axes.y.is_some() => 1,
        "z" if axes.z.is_some() => 2,
        _ => return Err(LightError::OpticalAxis(config.optical.clone())),
    };
    complete_frame(axes, primary).ok_or(LightError::DegenerateFrame)
}

/// A single emitter.
#[derive(Debug, Clone)]
pub enum LightSource {
    ParallelDisk(DiskLight),
    FileSampled(FileLight),
}

impl LightSource {
    pub fn from_config(config: &LightSourceConfig, base_dir: &Path) -> LightResult<Self> {
        match config {
            LightSourceConfig::Parallel(c) => DiskLight::from_config(c).map(LightSource::ParallelDisk),
            LightSourceConfig::RayFile(c) => FileLight::from_config(c, base_dir).map(LightSource::FileSampled),
        }
    }

    pub fn ray_count(&self) -> u64 {
        match self {
            LightSource::ParallelDisk(disk) => disk.ray_count,
            LightSource::FileSampled(file) => file.rays.len() as u64,
        }
    }

    /// Ray `local` of this emitter as `(ray, flux, wavelength)`.
    fn sample(&self, local: u64, counter: &mut u64) -> (Ray, f64, f64) {
        match self {
            LightSource::ParallelDisk(disk) => disk.sample(counter),
            LightSource::FileSampled(file) => {
                let ray = &file.rays[(local as usize).min(file.rays.len() - 1)];
                (ray.ray, ray.flux, ray.wavelength)
            }
        }
    }
}

/// Per-worker lookup state: the last resolved source and each source's
/// rejection counter.
#[derive(Debug, Clone, Default)]
pub struct LightCursor {
    last: usize,
    counters: Vec<u64>,
}

impl LightCursor {
    /// Counter value of source `source`.
    pub fn counter(&self, source: usize) -> u64 {
        self.counters.get(source).copied().unwrap_or(0)
    }
}

/// One sampled emitter ray.
#[derive(Debug, Clone, Copy)]
pub struct LightSample {
    pub source: usize,
    pub local: u64,
    pub ray: Ray,
    pub flux: f64,
    pub wavelength: f64,
}

/// All emitters of a job behind one global ray index.
#[derive(Debug, Clone)]
pub struct LightSourceSet {
    sources: Vec<Option<LightSource>>,
    /// `cumulative[s]..cumulative[s + 1]` are the global indices of source `s`.
    cumulative: Vec<u64>,
}

impl Default for LightSourceSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl LightSourceSet {
    /// Build from already constructed sources; `None` marks an excluded entry.
    pub fn new(sources: Vec<Option<LightSource>>) -> Self {
        let mut cumulative = Vec::with_capacity(sources.len() + 1);
        cumulative.push(0);
        let mut total = 0;
        for source in &sources {
            total += source.as_ref().map_or(0, LightSource::ray_count);
            cumulative.push(total);
        }
        Self { sources, cumulative }
    }

    /// Build from job entries. Entries that fail to build are logged and
    /// kept as zero-ray gaps.
    pub fn from_configs(configs: &[Option<LightSourceConfig>], base_dir: &Path) -> Self {
        let sources = configs
            .iter()
            .enumerate()
            .map(|(index, config)| {
                let config = config.as_ref()?;
                match LightSource::from_config(config, base_dir) {
                    Ok(source) => {
                        log::info!("Light source {}: {} rays", index, source.ray_count());
                        Some(source)
                    }
                    Err(e) => {
                        log::warn!("Excluding light_sources[{}]: {}", index, e);
                        None
                    }
                }
            })
            .collect();
        Self::new(sources)
    }

    pub fn total_ray_count(&self) -> u64 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn ray_count_of(&self, source: usize) -> u64 {
        self.sources
            .get(source)
            .and_then(Option::as_ref)
            .map_or(0, LightSource::ray_count)
    }

    pub fn source(&self, index: usize) -> Option<&LightSource> {
        self.sources.get(index).and_then(Option::as_ref)
    }

    /// Global index range of a source.
    pub fn range_of(&self, source: usize) -> std::ops::Range<u64> {
        self.cumulative[source]..self.cumulative[source + 1]
    }

    /// Cursor for worker `worker` of `workers`. Rejection counters start at
    /// disjoint offsets so workers draw from disjoint Halton ranges.
    pub fn cursor(&self, worker: usize, workers: usize) -> LightCursor {
        let workers = workers.max(1) as u64;
        let start = worker as u64 * 2 * self.total_ray_count().div_ceil(workers);
        LightCursor {
            last: 0,
            counters: vec![start; self.sources.len()],
        }
    }

    fn resolve(&self, global: u64, cursor: &mut LightCursor) -> usize {
        let last = cursor.last;
        if last < self.sources.len() && self.range_of(last).contains(&global) {
            return last;
        }
        let source = self.cumulative.partition_point(|&c| c <= global) - 1;
        cursor.last = source;
        source
    }

    /// Ray number `global` of the whole set, `None` past the end.
    pub fn sample(&self, global: u64, cursor: &mut LightCursor) -> Option<LightSample> {
        if global >= self.total_ray_count() {
            return None;
        }
        let source = self.resolve(global, cursor);
        let emitter = self.sources[source].as_ref()?;
        let local = global - self.cumulative[source];

        if cursor.counters.len() < self.sources.len() {
            cursor.counters.resize(self.sources.len(), 0);
        }
        let (ray, flux, wavelength) = emitter.sample(local, &mut cursor.counters[source]);

        Some(LightSample {
            source,
            local,
            ray,
            flux,
            wavelength,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::DiskShape;

    fn disk(num_ray: u64, radius: f64) -> ParallelLightConfig {
        ParallelLightConfig {
            origin: [0.0, 0.0, -1.0],
            direction: [0.0, 0.0, 2.0],
            num_ray,
            wavelength: 550.0,
            total_flux: 2.0,
            shape: DiskShape { radius },
        }
    }

    fn record(position: [f32; 3], direction: [f32; 3], flux: f32) -> RayRecord {
        RayRecord {
            position,
            direction,
            flux,
            wavelength: 600.0,
        }
    }

    fn ray_file_bytes(records: &[RayRecord]) -> Vec<u8> {
        let mut data = vec![0u8; RAY_FILE_HEADER_SIZE];
        for r in records {
            data.extend_from_slice(bytemuck::bytes_of(r));
        }
        data
    }

    #[test]
    fn test_index_coverage_with_gap() {
        let set = LightSourceSet::from_configs(
            &[
                Some(LightSourceConfig::Parallel(disk(7, 1.0))),
                Some(LightSourceConfig::Parallel(disk(5, -1.0))),
                None,
                Some(LightSourceConfig::Parallel(disk(3, 0.5))),
            ],
            Path::new("."),
        );

        assert_eq!(set.source_count(), 4);
        assert_eq!(set.total_ray_count(), 10);
        assert_eq!(set.ray_count_of(1), 0);
        assert_eq!(set.range_of(3), 7..10);

        let mut cursor = set.cursor(0, 1);
        for global in (0..set.total_ray_count()).rev() {
            let sample = set.sample(global, &mut cursor).unwrap();
            assert!(set.range_of(sample.source).contains(&global));
            assert_eq!(set.range_of(sample.source).start + sample.local, global);
        }
        assert_eq!(set.sample(0, &mut cursor).unwrap().source, 0);
        assert_eq!(set.sample(9, &mut cursor).unwrap().source, 3);
        assert!(set.sample(10, &mut cursor).is_none());
    }

    #[test]
    fn test_disk_samples_inside_radius() {
        let config = disk(10_000, 1.0);
        let set = LightSourceSet::new(vec![Some(LightSource::ParallelDisk(DiskLight::from_config(&config).unwrap()))]);
        let mut cursor = set.cursor(0, 1);

        let mut flux = 0.0;
        for global in 0..set.total_ray_count() {
            let sample = set.sample(global, &mut cursor).unwrap();
            let offset = sample.ray.origin - DVec3::new(0.0, 0.0, -1.0);
            assert!(offset.z.abs() < 1e-12);
            assert!(offset.length_squared() <= 1.0 + 1e-12);
            assert_eq!(sample.ray.direction, DVec3::Z);
            assert_eq!(sample.wavelength, 550.0);
            flux += sample.flux;
        }
        assert!((flux - 2.0).abs() < 1e-9);
        // Rejections advance the counter past the accepted count
        assert!(cursor.counter(0) > 10_000);
    }

    #[test]
    fn test_disk_sequence_is_reproducible() {
        let config = disk(1000, 1.0);
        let set = LightSourceSet::new(vec![Some(LightSource::ParallelDisk(DiskLight::from_config(&config).unwrap()))]);

        let run = || {
            let mut cursor = set.cursor(0, 1);
            (0..1000)
                .map(|g| set.sample(g, &mut cursor).unwrap().ray.origin)
                .collect::<Vec<_>>()
        };
        let first = run();
        assert_eq!(first, run());

        // No point repeats
        for (i, a) in first.iter().enumerate() {
            assert!(first[i + 1..].iter().all(|b| a != b));
        }
    }

    #[test]
    fn test_worker_cursors_use_disjoint_counters() {
        let config = disk(100, 1.0);
        let set = LightSourceSet::new(vec![Some(LightSource::ParallelDisk(DiskLight::from_config(&config).unwrap()))]);

        assert_eq!(set.cursor(0, 4).counter(0), 0);
        assert_eq!(set.cursor(3, 4).counter(0), 3 * 2 * 25);
    }

    #[test]
    fn test_invalid_disk() {
        assert!(matches!(DiskLight::from_config(&disk(10, 0.0)), Err(LightError::InvalidRadius(_))));
        assert!(matches!(DiskLight::from_config(&disk(0, 1.0)), Err(LightError::NoRays)));
    }

    #[test]
    fn test_record_layout() {
        assert_eq!(RAY_FILE_RECORD_SIZE, 32);
        let r = record([1.0, 2.0, 3.0], [0.0, 0.0, 1.0], 0.5);
        let bytes = ray_file_bytes(&[r]);
        assert_eq!(parse_ray_file(&bytes), vec![r]);
        assert!(parse_ray_file(&bytes[..RAY_FILE_HEADER_SIZE + 31]).is_empty());
        assert!(parse_ray_file(&[0u8; 16]).is_empty());
    }

    #[test]
    fn test_file_light_rescales_and_transforms() {
        let records: Vec<RayRecord> = (0..20)
            .map(|i| record([i as f32, 0.0, 0.0], [0.0, 0.0, 1.0], 1.0 + i as f32))
            .collect();
        let dir = std::env::temp_dir().join("lumen_renderer_light_test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("rays.bin"), ray_file_bytes(&records)).unwrap();

        // Local z maps to world +X, local x to world +Y
        let config = RayFileLightConfig {
            origin: [0.0, 0.0, 5.0],
            x_dir: Some([0.0, 1.0, 0.0]),
            y_dir: None,
            z_dir: Some([1.0, 0.0, 0.0]),
            optical: "z".to_string(),
            path: PathBuf::from("rays.bin"),
            num_ray: 8,
            total_flux: 4.0,
        };
        let set = LightSourceSet::from_configs(&[Some(LightSourceConfig::RayFile(config))], &dir);
        assert_eq!(set.total_ray_count(), 8);

        let mut cursor = set.cursor(0, 1);
        let samples: Vec<LightSample> = (0..8).map(|g| set.sample(g, &mut cursor).unwrap()).collect();
        let flux: f64 = samples.iter().map(|s| s.flux).sum();
        assert!((flux - 4.0).abs() < 1e-9);

        for s in &samples {
            assert!((s.ray.direction - DVec3::X).length() < 1e-12);
            assert_eq!(s.ray.origin.x, 0.0);
            assert_eq!(s.ray.origin.z, 5.0);
            assert_eq!(s.wavelength, 600.0);
        }
        // Halton index 0 picks the first record
        assert_eq!(samples[0].ray.origin.y, 0.0);
    }

    #[test]
    fn test_file_light_count_is_clamped() {
        let records = vec![record([0.0; 3], [0.0, 0.0, 1.0], 2.0); 3];
        let light = FileLight::from_records(&records, [DVec3::X, DVec3::Y, DVec3::Z], DVec3::ZERO, 100, 1.0).unwrap();
        assert_eq!(LightSource::FileSampled(light).ray_count(), 3);

        let dark = vec![record([0.0; 3], [0.0, 0.0, 1.0], 0.0); 3];
        assert!(matches!(
            FileLight::from_records(&dark, [DVec3::X, DVec3::Y, DVec3::Z], DVec3::ZERO, 2, 1.0),
            Err(LightError::ZeroFlux)
        ));
    }

    #[test]
    fn test_ray_file_frame_validation() {
        let mut config = RayFileLightConfig {
            origin: [0.0; 3],
            x_dir: Some([1.0, 0.0, 0.0]),
            y_dir: Some([0.0, 1.0, 0.0]),
            z_dir: Some([0.0, 0.0, 1.0]),
            optical: "z".to_string(),
            path: PathBuf::from("missing.bin"),
            num_ray: 1,
            total_flux: 1.0,
        };
        assert!(matches!(ray_file_frame(&config), Err(LightError::AxisCount(3))));

        config.y_dir = None;
        config.optical = "y".to_string();
        assert!(matches!(ray_file_frame(&config), Err(LightError::OpticalAxis(_))));

        config.optical = "Z".to_string();
        let frame = ray_file_frame(&config).unwrap();
        assert!((frame[1] - DVec3::Y).length() < 1e-12);

        assert!(matches!(
            FileLight::from_config(&config, Path::new("/definitely/not/here")),
            Err(LightError::Io { .. })
        ));
    }
}
