//! Materials and surface scattering.
//!
//! Smooth materials (`roughness_alpha == 0`) scatter analytically with the
//! Fresnel equations. Rough materials sample tabulated microfacet BSDFs, one
//! table for light entering the material and, when it transmits, one for
//! light leaving it.

use std::f64::consts::PI;

use lumen_core::{Color, FaceOrientation, MaterialConfig};
use lumen_math::{orthonormal_basis, rotate_about, DVec3};
use rand::RngCore;
use thiserror::Error;

use crate::fresnel::Fresnel;
use crate::microfacet::{BsdfResolution, BsdfTable, Ggx};
use crate::sampling::{cosine_polar_angle, gen_f64};

/// Largest diffuse polar angle; keeps diffuse rays off the tangent plane.
const MAX_DIFFUSE_POLAR: f64 = PI * 0.5 - 1e-6;

/// Errors that invalidate a material entry.
#[derive(Error, Debug, PartialEq)]
pub enum MaterialError {
    #[error("Material {name}: refractive index must be positive (got {ior})")]
    InvalidIor { name: String, ior: f64 },

    #[error("Material {name}: roughness must be non-negative (got {alpha})")]
    InvalidRoughness { name: String, alpha: f64 },
}

/// Errors that discard the path being scattered.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScatterError {
    #[error("Hit a shape without a usable material")]
    MissingMaterial,

    #[error("Rough material {0} has no BSDF table for this side")]
    MissingBsdfTable(String),

    #[error("Scattered direction disagrees with the medium transition")]
    MediumMismatch,
}

pub type ScatterResult<T> = Result<T, ScatterError>;

/// What the transmitted share of a surface interaction turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transmission {
    Refract,
    Diffuse,
    Absorb,
}

/// Geometry of one surface hit, as seen by the scattering code.
#[derive(Debug, Clone, Copy)]
pub struct Interaction {
    pub orientation: FaceOrientation,
    /// Interpolated normal, unit length.
    pub shading_normal: DVec3,
    /// Geometric face normal, unit length.
    pub flat_normal: DVec3,
    /// Travel direction of the arriving ray, unit length.
    pub incident: DVec3,
}

/// Optical parameters plus the tables built for them.
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub constant_reflectance: f64,
    pub ior: f64,
    pub transmittance: f64,
    pub diffuse_color: Option<Color>,
    pub absorption: Option<Color>,
    pub roughness_alpha: f64,
    /// 0: entering the material, 1: leaving it.
    bsdf: [Option<BsdfTable>; 2],
}

impl Material {
    pub fn from_config(config: &MaterialConfig) -> Result<Self, MaterialError> {
        if !(config.ior > 0.0) {
            return Err(MaterialError::InvalidIor {
                name: config.name.clone(),
                ior: config.ior,
            });
        }
        if !(config.roughness_alpha >= 0.0) {
            return Err(MaterialError::InvalidRoughness {
                name: config.name.clone(),
                alpha: config.roughness_alpha,
            });
        }

        Ok(Self {
            name: config.name.clone(),
            constant_reflectance: config.constant_ref_ratio.clamp(0.0, 1.0),
            ior: config.ior,
            transmittance: config.transmittance.clamp(0.0, 1.0),
            diffuse_color: config.diffuse_color.map(Color::from_array),
            absorption: config.absorption_coef.map(Color::from_array),
            roughness_alpha: config.roughness_alpha,
            bsdf: [None, None],
        })
    }

    pub fn is_rough(&self) -> bool {
        self.roughness_alpha > 0.0
    }

    /// Build the microfacet tables a rough material needs. Smooth materials
    /// need none.
    pub fn build_tables(&mut self, resolution: BsdfResolution) {
        if !self.is_rough() {
            return;
        }
        let model = Ggx::new(self.roughness_alpha);
        self.bsdf[0] = Some(BsdfTable::build(
            1.0,
            self.ior,
            self.constant_reflectance,
            &model,
            resolution,
        ));
        if self.transmittance > 0.0 {
            self.bsdf[1] = Some(BsdfTable::build(
                self.ior,
                1.0,
                self.constant_reflectance,
                &model,
                resolution,
            ));
        }
    }

    pub fn has_tables(&self) -> bool {
        self.bsdf[0].is_some()
    }

    /// Scatter a ray arriving along `incident` at a surface with `normal`.
    ///
    /// Updates `power` and `in_medium` and returns the outgoing direction
    /// (zero when absorbed) together with the normal turned towards the
    /// incident side.
    pub fn sample(
        &self,
        orientation: FaceOrientation,
        normal: DVec3,
        incident: DVec3,
        in_medium: &mut bool,
        rng: &mut dyn RngCore,
        power: &mut Color,
    ) -> ScatterResult<(DVec3, DVec3)> {
        let mut normal = normal;
        if (orientation == FaceOrientation::Outer && *in_medium)
            || (orientation == FaceOrientation::Inner && !*in_medium)
        {
            normal = -normal;
        }

        if !self.is_rough() {
            return Ok(self.sample_smooth(orientation, normal, incident, in_medium, rng, power));
        }

        let table = self.bsdf[usize::from(*in_medium)]
            .as_ref()
            .ok_or_else(|| ScatterError::MissingBsdfTable(self.name.clone()))?;

        let cos = normal.dot(incident);
        if orientation == FaceOrientation::Auto && cos > 0.0 {
            normal = -normal;
        }
        let incidence = cos.abs().min(1.0).acos();
        let sampled = table.sample(incidence, rng);

        let direction = if sampled.is_transmission() {
            match self.resolve_transmission(rng) {
                Transmission::Refract => {
                    *in_medium = !*in_medium;
                    local_direction(normal, incident, sampled.polar, sampled.azimuth)
                }
                Transmission::Diffuse => self.diffuse(normal, incident, rng, power),
                Transmission::Absorb => absorb(power),
            }
        } else {
            local_direction(normal, incident, sampled.polar, sampled.azimuth)
        };
        Ok((direction, normal))
    }

    fn sample_smooth(
        &self,
        orientation: FaceOrientation,
        normal: DVec3,
        incident: DVec3,
        in_medium: &mut bool,
        rng: &mut dyn RngCore,
        power: &mut Color,
    ) -> (DVec3, DVec3) {
        let (n1, n2) = if *in_medium { (self.ior, 1.0) } else { (1.0, self.ior) };
        let fresnel = Fresnel::new(normal, incident, n1, n2);
        let normal = if orientation == FaceOrientation::Auto {
            -fresnel.normal()
        } else {
            normal
        };

        let reflectance = (self.constant_reflectance
            + (1.0 - self.constant_reflectance) * fresnel.reflectance())
        .clamp(0.0, 1.0);

        // Without a transmitted share the reflectance becomes a weight
        let splits = self.diffuse_color.is_some() || self.transmittance > 0.0;
        if splits && reflectance < 1.0 {
            if reflectance == 0.0 || reflectance <= gen_f64(rng) {
                if let Some(refracted) = fresnel.refracted() {
                    let direction = match self.resolve_transmission(rng) {
                        Transmission::Refract => {
                            *in_medium = !*in_medium;
                            refracted
                        }
                        Transmission::Diffuse => self.diffuse(normal, incident, rng, power),
                        Transmission::Absorb => absorb(power),
                    };
                    return (direction, normal);
                }
            }
        } else {
            *power *= reflectance;
        }

        (fresnel.reflected(), normal)
    }

    fn resolve_transmission(&self, rng: &mut dyn RngCore) -> Transmission {
        if self.transmittance > 0.0 && gen_f64(rng) < self.transmittance {
            Transmission::Refract
        } else if self.diffuse_color.is_some() {
            Transmission::Diffuse
        } else {
            Transmission::Absorb
        }
    }

    /// Cosine-weighted direction on the incident side.
    fn diffuse(&self, normal: DVec3, incident: DVec3, rng: &mut dyn RngCore, power: &mut Color) -> DVec3 {
        let polar = cosine_polar_angle(gen_f64(rng)).min(MAX_DIFFUSE_POLAR);
        let azimuth = gen_f64(rng) * 2.0 * PI;
        if let Some(color) = self.diffuse_color {
            *power *= color;
        }
        local_direction(normal, incident, polar, azimuth)
    }

    /// Beer-Lambert attenuation in base 10 over `length`. A material
    /// without absorption coefficients is opaque.
    pub fn attenuate(&self, power: &mut Color, length: f64) {
        match self.absorption {
            Some(coef) => *power *= Color::from_array(coef.to_array().map(|c| 10f64.powf(-length * c))),
            None => *power = Color::ZERO,
        }
    }
}

fn absorb(power: &mut Color) -> DVec3 {
    *power = Color::ZERO;
    DVec3::ZERO
}

/// Direction at `polar` from `normal`, turned by `azimuth` about it. Zero
/// azimuth lies in the plane of `normal` and `incident`, on the far side
/// from where the ray came.
fn local_direction(normal: DVec3, incident: DVec3, polar: f64, azimuth: f64) -> DVec3 {
    let tilt_axis = normal
        .cross(incident)
        .try_normalize()
        .unwrap_or_else(|| orthonormal_basis(normal).1);
    let tilted = rotate_about(normal, tilt_axis, polar);
    rotate_about(tilted, normal, azimuth).normalize_or_zero()
}

/// Every material of a job, indexed like the job's `materials` array.
#[derive(Debug, Clone, Default)]
pub struct MaterialTable {
    materials: Vec<Option<Material>>,
}

impl MaterialTable {
    pub fn new(materials: Vec<Option<Material>>) -> Self {
        Self { materials }
    }

    /// Validate every entry and build BSDF tables for the referenced ones.
    ///
    /// Invalid entries are logged and leave a gap.
    pub fn build(configs: &[Option<MaterialConfig>], referenced: &[bool], resolution: BsdfResolution) -> Self {
        let materials = configs
            .iter()
            .enumerate()
            .map(|(index, config)| {
                let config = config.as_ref()?;
                match Material::from_config(config) {
                    Ok(mut material) => {
                        if referenced.get(index).copied().unwrap_or(false) && material.is_rough() {
                            log::info!("Building BSDF tables for material {}", material.name);
                            material.build_tables(resolution);
                        }
                        Some(material)
                    }
                    Err(e) => {
                        log::warn!("Excluding materials[{}]: {}", index, e);
                        None
                    }
                }
            })
            .collect();
        Self { materials }
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Material> {
        self.materials.get(index).and_then(Option::as_ref)
    }

    /// Scatter at a surface and check the result against the flat normal.
    ///
    /// A reflection (outgoing on the incident side of the face) must leave
    /// the medium flag unchanged and a transmission must flip it; anything
    /// else is a [`ScatterError::MediumMismatch`].
    pub fn scatter(
        &self,
        material: Option<usize>,
        interaction: &Interaction,
        in_medium: &mut bool,
        power: &mut Color,
        rng: &mut dyn RngCore,
    ) -> ScatterResult<DVec3> {
        let material = material
            .and_then(|i| self.get(i))
            .ok_or(ScatterError::MissingMaterial)?;

        let was_in_medium = *in_medium;
        let (direction, oriented) = material.sample(
            interaction.orientation,
            interaction.shading_normal,
            interaction.incident,
            in_medium,
            rng,
            power,
        )?;

        if direction != DVec3::ZERO {
            let flat = if interaction.flat_normal.dot(oriented) < 0.0 {
                -interaction.flat_normal
            } else {
                interaction.flat_normal
            };
            let is_reflection = flat.dot(direction) > 0.0;
            if is_reflection == (*in_medium != was_in_medium) {
                return Err(ScatterError::MediumMismatch);
            }
        }
        Ok(direction)
    }

    /// Attenuate `power` over `length` inside `material`.
    pub fn volume_attenuate(&self, material: Option<usize>, power: &mut Color, length: f64) {
        match material.and_then(|i| self.get(i)) {
            Some(m) => m.attenuate(power, length),
            None => *power = Color::ZERO,
        }
    }
}
