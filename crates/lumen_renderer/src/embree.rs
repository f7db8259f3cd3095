//! Embree 4 integration as an alternative intersection oracle.
//!
//! Manual FFI bindings to Intel Embree 4, avoiding a bindgen dependency.
//! Only the handful of calls needed for a single-level triangle scene are
//! declared. Linking is handled by `build.rs` when the `embree` feature is on.

use std::ffi::c_void;

use lumen_core::Scene;
use lumen_math::Ray;
use thiserror::Error;

use crate::intersect::{Hit, Intersector};

type Handle = *mut c_void;

// rtcore_common.h / rtcore_geometry.h / rtcore_buffer.h
const GEOMETRY_TYPE_TRIANGLE: u32 = 0;
const BUFFER_TYPE_INDEX: u32 = 0;
const BUFFER_TYPE_VERTEX: u32 = 1;
const FORMAT_UINT3: u32 = 0x5003;
const FORMAT_FLOAT3: u32 = 0x9003;
const INVALID_ID: u32 = u32::MAX;

/// Near clip used for every query, in scene units.
const TNEAR: f32 = 1e-6;

/// `RTCRayHit` with its ray and hit halves laid out as in rtcore_ray.h.
#[repr(C, align(16))]
#[derive(Debug, Copy, Clone)]
struct RayHit {
    org: [f32; 3],
    tnear: f32,
    dir: [f32; 3],
    time: f32,
    tfar: f32,
    mask: u32,
    ray_id: u32,
    flags: u32,

    ng: [f32; 3],
    u: f32,
    v: f32,
    prim_id: u32,
    geom_id: u32,
    inst_id: [u32; 1],
}

impl RayHit {
    fn query(ray: &Ray) -> Self {
        Self {
            org: ray.origin.as_vec3().to_array(),
            tnear: TNEAR,
            dir: ray.direction.as_vec3().to_array(),
            time: 0.0,
            tfar: f32::INFINITY,
            mask: u32::MAX,
            ray_id: 0,
            flags: 0,
            ng: [0.0; 3],
            u: 0.0,
            v: 0.0,
            prim_id: INVALID_ID,
            geom_id: INVALID_ID,
            inst_id: [INVALID_ID],
        }
    }

    fn to_hit(self) -> Option<Hit> {
        (self.geom_id != INVALID_ID).then(|| Hit {
            face: self.prim_id as usize,
            u: self.u as f64,
            v: self.v as f64,
            t: self.tfar as f64,
        })
    }
}

extern "C" {
    fn rtcNewDevice(config: *const std::ffi::c_char) -> Handle;
    fn rtcReleaseDevice(device: Handle);
    fn rtcGetDeviceError(device: Handle) -> i32;

    fn rtcNewScene(device: Handle) -> Handle;
    fn rtcReleaseScene(scene: Handle);
    fn rtcCommitScene(scene: Handle);

    fn rtcNewGeometry(device: Handle, geometry_type: u32) -> Handle;
    fn rtcReleaseGeometry(geometry: Handle);
    fn rtcCommitGeometry(geometry: Handle);
    fn rtcAttachGeometry(scene: Handle, geometry: Handle) -> u32;

    fn rtcSetSharedGeometryBuffer(
        geometry: Handle,
        buffer_type: u32,
        slot: u32,
        format: u32,
        ptr: *const c_void,
        byte_offset: usize,
        byte_stride: usize,
        item_count: usize,
    );

    fn rtcIntersect1(scene: Handle, rayhit: *mut RayHit, args: *const c_void);
}

/// Failures while committing a scene to Embree.
#[derive(Error, Debug)]
pub enum EmbreeError {
    #[error("Embree returned no {0}")]
    Create(&'static str),

    #[error("Embree error {code} ({name}) while {stage}")]
    Device {
        code: i32,
        name: &'static str,
        stage: &'static str,
    },
}

fn error_name(code: i32) -> &'static str {
    const NAMES: [&str; 7] = [
        "none",
        "unknown",
        "invalid argument",
        "invalid operation",
        "out of memory",
        "unsupported CPU",
        "cancelled",
    ];
    usize::try_from(code)
        .ok()
        .and_then(|i| NAMES.get(i))
        .copied()
        .unwrap_or("unrecognised")
}

/// The flattened scene committed as one Embree triangle geometry.
///
/// Primitive ids equal global face indices, so hits map straight back into
/// the [`Scene`].
pub struct EmbreeScene {
    device: Handle,
    scene: Handle,
    triangle_count: usize,
    // Shared with Embree, which reads them until the scene is released
    _positions: Vec<f32>,
    _indices: Vec<u32>,
}

/// Owns a device and scene until construction succeeds.
struct Pending {
    device: Handle,
    scene: Handle,
}

impl Pending {
    /// Turn a pending device error into an [`EmbreeError`].
    fn check(&self, stage: &'static str) -> Result<(), EmbreeError> {
        // SAFETY: `device` is a live handle from rtcNewDevice.
        let code = unsafe { rtcGetDeviceError(self.device) };
        if code == 0 {
            return Ok(());
        }
        Err(EmbreeError::Device {
            code,
            name: error_name(code),
            stage,
        })
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        // SAFETY: both handles are either null or live, and released once.
        unsafe {
            if !self.scene.is_null() {
                rtcReleaseScene(self.scene);
            }
            if !self.device.is_null() {
                rtcReleaseDevice(self.device);
            }
        }
    }
}

impl EmbreeScene {
    /// Commit every triangle of `source` as one geometry. Primitive ids are
    /// global face indices.
    pub fn new(source: &Scene) -> Result<Self, EmbreeError> {
        let positions: Vec<f32> = source
            .positions
            .iter()
            .flat_map(|p| p.as_vec3().to_array())
            .collect();
        let indices: Vec<u32> = source.triangles.iter().flatten().copied().collect();
        let triangle_count = source.face_count();

        // SAFETY: handles are checked for null before use, and the shared
        // buffers move into the returned value, which outlives the scene.
        let mut pending = unsafe {
            Pending {
                device: rtcNewDevice(std::ptr::null()),
                scene: std::ptr::null_mut(),
            }
        };
        if pending.device.is_null() {
            return Err(EmbreeError::Create("device"));
        }
        pending.check("creating the device")?;

        unsafe {
            pending.scene = rtcNewScene(pending.device);
            if pending.scene.is_null() {
                return Err(EmbreeError::Create("scene"));
            }

            if triangle_count > 0 {
                let geometry = rtcNewGeometry(pending.device, GEOMETRY_TYPE_TRIANGLE);
                if geometry.is_null() {
                    return Err(EmbreeError::Create("geometry"));
                }
                rtcSetSharedGeometryBuffer(
                    geometry,
                    BUFFER_TYPE_VERTEX,
                    0,
                    FORMAT_FLOAT3,
                    positions.as_ptr().cast(),
                    0,
                    3 * std::mem::size_of::<f32>(),
                    positions.len() / 3,
                );
                rtcSetSharedGeometryBuffer(
                    geometry,
                    BUFFER_TYPE_INDEX,
                    0,
                    FORMAT_UINT3,
                    indices.as_ptr().cast(),
                    0,
                    3 * std::mem::size_of::<u32>(),
                    triangle_count,
                );
                rtcCommitGeometry(geometry);
                rtcAttachGeometry(pending.scene, geometry);
                rtcReleaseGeometry(geometry);
                pending.check("attaching geometry")?;
            }

            rtcCommitScene(pending.scene);
        }
        pending.check("committing the scene")?;

        log::info!("Embree scene committed: {} triangles", triangle_count);

        let (device, scene) = (pending.device, pending.scene);
        std::mem::forget(pending);
        Ok(Self {
            device,
            scene,
            triangle_count,
            _positions: positions,
            _indices: indices,
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.triangle_count
    }
}

impl Intersector for EmbreeScene {
    fn intersect(&self, ray: &Ray) -> Option<Hit> {
        let mut query = RayHit::query(ray);
        // SAFETY: the scene is committed and `query` matches RTCRayHit.
        unsafe { rtcIntersect1(self.scene, &mut query, std::ptr::null()) };
        query.to_hit()
    }
}

impl Drop for EmbreeScene {
    fn drop(&mut self) {
        // SAFETY: both handles are live and owned by `self`.
        unsafe {
            rtcReleaseScene(self.scene);
            rtcReleaseDevice(self.device);
        }
    }
}

// SAFETY: the committed scene is only read after construction, and Embree
// allows concurrent rtcIntersect1 calls on a committed scene.
unsafe impl Send for EmbreeScene {}
unsafe impl Sync for EmbreeScene {}
