//! Tabulated rough-surface BSDFs.
//!
//! A [`BsdfTable`] stores, for a set of incidence angles, the distribution
//! of outgoing directions over the sphere as an azimuth marginal plus one
//! polar conditional per azimuth sample. Polar angles below pi/2 are
//! reflections, angles above are transmissions.
//!
//! Tables are built once per material and transport direction from a
//! microfacet model, then only read.

use std::f64::consts::{FRAC_PI_2, PI};

use lumen_core::BsdfResolutionConfig;
use lumen_math::DVec3;
use rand::RngCore;
use rayon::prelude::*;

use crate::distribution::PiecewiseLinearDistribution;
use crate::fresnel::Fresnel;
use crate::sampling::gen_f64;

const DENOMINATOR_TOLERANCE: f64 = 2.3283064365386963e-10;

/// Area tolerance for the reflected and transmitted azimuth curves, whose
/// samples must survive in the azimuth marginal.
const SIDE_TOLERANCE: f64 = 0.01;

/// Smallest incidence cosine tabulated; exactly grazing incidence is singular.
const MIN_INCIDENCE_COS: f64 = 1e-3;

/// Normal distribution and masking terms of a microfacet model.
pub trait MicrofacetModel: Sync {
    /// Density of microfacet normals with cosine `cos_h` to the macro normal.
    fn ndf(&self, cos_h: f64) -> f64;

    /// Masking-shadowing for incident and outgoing cosines.
    fn masking(&self, cos_incident: f64, cos_outgoing: f64) -> f64;
}

/// Trowbridge-Reitz (GGX) distribution with Smith masking.
#[derive(Debug, Clone, Copy)]
pub struct Ggx {
    alpha2: f64,
}

impl Ggx {
    pub fn new(roughness_alpha: f64) -> Self {
        Self {
            alpha2: roughness_alpha * roughness_alpha,
        }
    }

    fn lambda(&self, cos: f64) -> f64 {
        let cos = cos.abs();
        if cos <= 0.0 {
            return f64::INFINITY;
        }
        (-1.0 + (1.0 + self.alpha2 * (1.0 / (cos * cos) - 1.0)).sqrt()) * 0.5
    }
}

impl MicrofacetModel for Ggx {
    fn ndf(&self, cos_h: f64) -> f64 {
        if cos_h <= 0.0 || cos_h > 1.0 {
            return 0.0;
        }
        let t = 1.0 - (1.0 - self.alpha2) * cos_h * cos_h;
        self.alpha2 / (PI * t * t)
    }

    fn masking(&self, cos_incident: f64, cos_outgoing: f64) -> f64 {
        1.0 / ((1.0 + self.lambda(cos_incident)) * (1.0 + self.lambda(cos_outgoing)))
    }
}

/// Grid resolution of a table. Every count is at least 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BsdfResolution {
    pub incidence: usize,
    pub azimuth: usize,
    pub polar: usize,
}

impl Default for BsdfResolution {
    fn default() -> Self {
        BsdfResolutionConfig::default().into()
    }
}

impl From<BsdfResolutionConfig> for BsdfResolution {
    fn from(config: BsdfResolutionConfig) -> Self {
        Self {
            incidence: config.incidence.max(2),
            azimuth: config.azimuth.max(2),
            polar: config.polar.max(2),
        }
    }
}

#[derive(Debug, Clone)]
struct IncidenceSlice {
    azimuth: PiecewiseLinearDistribution,
    /// One polar distribution per value of `azimuth`.
    polar: Vec<PiecewiseLinearDistribution>,
}

impl IncidenceSlice {
    /// Polar table for a sampled azimuth.
    ///
    /// Between two kept azimuths the joint density is the linear blend of
    /// their polar tables, so the conditional is a two-table mixture
    /// weighted by each end's share of the azimuth density at `azimuth`.
    fn polar_table(&self, azimuth: f64, u: f64) -> &PiecewiseLinearDistribution {
        let last = self.polar.len() - 1;
        if last == 0 {
            return &self.polar[0];
        }
        let position = self.azimuth.position_of(azimuth);
        let k = (position.floor() as usize).min(last - 1);
        let t = position - k as f64;
        let masses = self.azimuth.densities();
        let near = (1.0 - t) * masses[k];
        let far = t * masses[k + 1];
        if near + far <= 0.0 || u * (near + far) < near {
            &self.polar[k]
        } else {
            &self.polar[k + 1]
        }
    }
}

/// Sampled scattering direction in the table frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BsdfSample {
    /// Azimuth from the mirror direction, in [0, 2pi].
    pub azimuth: f64,
    /// Angle from the surface normal on the incident side, in [0, pi].
    pub polar: f64,
}

impl BsdfSample {
    /// Polar angles from pi/2 on leave through the surface.
    pub fn is_transmission(&self) -> bool {
        self.polar >= FRAC_PI_2
    }
}

/// Outgoing-direction distributions per incidence bucket.
#[derive(Debug, Clone)]
pub struct BsdfTable {
    n_incident: f64,
    n_transmitted: f64,
    slices: Vec<IncidenceSlice>,
}

impl BsdfTable {
    /// Build the table for light going from index `n_incident` into
    /// `n_transmitted`.
    ///
    /// Incidence buckets are uniform in cosine, bucket `k` at
    /// `cos = 1 - k / (K - 1)`. Buckets are built in parallel.
    pub fn build(
        n_incident: f64,
        n_transmitted: f64,
        constant_reflectance: f64,
        model: &dyn MicrofacetModel,
        resolution: BsdfResolution,
    ) -> Self {
        let buckets = resolution.incidence.max(2);
        let slices: Vec<IncidenceSlice> = (0..buckets)
            .into_par_iter()
            .map(|k| {
                let cos = bucket_cos(k, buckets);
                build_slice(
                    cos.acos(),
                    n_incident,
                    n_transmitted,
                    constant_reflectance,
                    model,
                    resolution,
                )
            })
            .collect();

        log::debug!(
            "BSDF table {} -> {}: {} incidences, {} azimuths kept at normal incidence",
            n_incident,
            n_transmitted,
            slices.len(),
            slices.first().map(|s| s.polar.len()).unwrap_or(0)
        );

        Self {
            n_incident,
            n_transmitted,
            slices,
        }
    }

    pub fn n_incident(&self) -> f64 {
        self.n_incident
    }

    pub fn n_transmitted(&self) -> f64 {
        self.n_transmitted
    }

    pub fn incidence_count(&self) -> usize {
        self.slices.len()
    }

    /// Total scattered mass (reflected plus transmitted) for the bucket
    /// nearest to `cos_incidence`.
    pub fn albedo(&self, cos_incidence: f64) -> f64 {
        let slice = &self.slices[self.bucket_of(cos_incidence)];
        slice.azimuth.total()
    }

    fn bucket_of(&self, cos_incidence: f64) -> usize {
        let last = self.slices.len() - 1;
        let k = ((1.0 - cos_incidence.abs().min(1.0)) * last as f64).round() as usize;
        k.min(last)
    }

    /// Draw an outgoing direction for incidence angle `incidence`
    /// (radians from the normal, in [0, pi/2]).
    ///
    /// Uses the nearest incidence bucket. The polar angle comes from one of
    /// the two tabulated azimuths around the sampled one; no table values
    /// are interpolated.
    pub fn sample(&self, incidence: f64, rng: &mut dyn RngCore) -> BsdfSample {
        let slice = &self.slices[self.bucket_of(incidence.cos())];
        let azimuth = slice.azimuth.sample_with(rng);
        let polar = slice.polar_table(azimuth, gen_f64(rng)).sample_with(rng);
        BsdfSample { azimuth, polar }
    }
}

fn bucket_cos(k: usize, buckets: usize) -> f64 {
    (1.0 - k as f64 / (buckets - 1) as f64).max(MIN_INCIDENCE_COS)
}

fn build_slice(
    incidence: f64,
    n_incident: f64,
    n_transmitted: f64,
    constant_reflectance: f64,
    model: &dyn MicrofacetModel,
    resolution: BsdfResolution,
) -> IncidenceSlice {
    let incident = DVec3::new(-incidence.sin(), 0.0, incidence.cos());
    let azimuth_count = resolution.azimuth.max(2);
    let polar_count = resolution.polar.max(2);

    let polar_values: Vec<f64> = (0..polar_count)
        .map(|j| j as f64 * PI / (polar_count - 1) as f64)
        .collect();

    let mut azimuth_values = Vec::with_capacity(azimuth_count);
    let mut polar_tables = Vec::with_capacity(azimuth_count);
    for a in 0..azimuth_count {
        let phi = a as f64 * 2.0 * PI / (azimuth_count - 1) as f64;
        let densities = polar_values
            .iter()
            .map(|&theta| {
                scattering_density(
                    incident,
                    phi,
                    theta,
                    n_incident,
                    n_transmitted,
                    constant_reflectance,
                    model,
                )
            })
            .collect();
        azimuth_values.push(phi);
        polar_tables.push(PiecewiseLinearDistribution::new(polar_values.clone(), densities));
    }

    // Samples bracketing the horizon split the polar tables into a
    // reflected and a transmitted section, simplified separately
    let horizon = [(polar_count - 1) / 2, polar_count / 2];

    // Reflection is usually the faint side; its own azimuth profile decides
    // which azimuths survive as much as the total does
    let masses: Vec<f64> = polar_tables.iter().map(|t| t.total()).collect();
    let reflected: Vec<f64> = polar_tables
        .iter()
        .map(|t| t.cumulative_at(t.position_of(FRAC_PI_2)))
        .collect();
    let transmitted: Vec<f64> = masses
        .iter()
        .zip(&reflected)
        .map(|(m, r)| (m - r).max(0.0))
        .collect();
    let mut required = Vec::new();
    for side in [reflected, transmitted] {
        let curve = PiecewiseLinearDistribution::new(azimuth_values.clone(), side);
        required.extend(curve.simplify_within(SIDE_TOLERANCE).1);
    }

    let (azimuth, kept) =
        PiecewiseLinearDistribution::new(azimuth_values, masses).simplify_keeping(&required);
    let polar = kept
        .iter()
        .map(|&i| polar_tables[i].simplify_sections(&horizon).0)
        .collect();

    IncidenceSlice { azimuth, polar }
}

/// Density of scattering into spherical direction `(phi, theta)`, already
/// multiplied by `sin(theta)` for integration in angle space.
fn scattering_density(
    incident: DVec3,
    phi: f64,
    theta: f64,
    n_incident: f64,
    n_transmitted: f64,
    constant_reflectance: f64,
    model: &dyn MicrofacetModel,
) -> f64 {
    let (sin_theta, cos_theta) = theta.sin_cos();
    let outgoing = DVec3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta);
    let is_reflection = outgoing.z >= 0.0;

    let half = if is_reflection {
        (incident + outgoing).normalize_or_zero()
    } else {
        let h = -(incident * n_incident + outgoing * n_transmitted);
        let h = h.normalize_or_zero();
        if h.z < 0.0 {
            -h
        } else {
            h
        }
    };
    if half == DVec3::ZERO {
        return 0.0;
    }

    let cos_ih = incident.dot(half);
    let cos_oh = outgoing.dot(half);
    let fresnel = Fresnel::new(half, incident, n_incident, n_transmitted).reflectance();
    let f = constant_reflectance + (1.0 - constant_reflectance) * fresnel;

    let (weight, numerator, denominator) = if is_reflection {
        (f, 1.0, 4.0 * incident.z)
    } else {
        if cos_ih * cos_oh >= 0.0 {
            return 0.0;
        }
        let bracket = n_incident * cos_ih + n_transmitted * cos_oh;
        (
            1.0 - f,
            cos_ih.abs() * cos_oh.abs() * n_transmitted * n_transmitted,
            incident.z * bracket * bracket,
        )
    };
    if denominator <= DENOMINATOR_TOLERANCE {
        return 0.0;
    }

    let d = model.ndf(half.z);
    let g = model.masking(incident.z, outgoing.z.abs());
    let p = weight * d * g * numerator / denominator;
    (p * half.z * sin_theta).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small() -> BsdfResolution {
        BsdfResolution {
            incidence: 9,
            azimuth: 65,
            polar: 129,
        }
    }

    #[test]
    fn test_ggx_normalisation() {
        // The projected NDF integrates to one over the hemisphere
        let ggx = Ggx::new(0.3);
        let n = 20_000;
        let integral: f64 = (0..n)
            .map(|i| {
                let theta = (i as f64 + 0.5) / n as f64 * PI * 0.5;
                ggx.ndf(theta.cos()) * theta.cos() * theta.sin() * 2.0 * PI * (PI * 0.5 / n as f64)
            })
            .sum();
        assert!((integral - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_smith_masking_range() {
        let ggx = Ggx::new(0.5);
        assert!((ggx.masking(1.0, 1.0) - 1.0).abs() < 1e-12);
        let grazing = ggx.masking(0.05, 0.05);
        assert!(grazing > 0.0 && grazing < 0.5);
        assert_eq!(ggx.ndf(0.0), 0.0);
    }

    #[test]
    fn test_bucket_cosines() {
        assert_eq!(bucket_cos(0, 5), 1.0);
        assert_eq!(bucket_cos(2, 5), 0.5);
        assert_eq!(bucket_cos(4, 5), MIN_INCIDENCE_COS);
    }

    #[test]
    fn test_mirror_like_table_reflects_near_mirror_direction() {
        let table = BsdfTable::build(1.0, 1.5, 1.0, &Ggx::new(0.05), small());
        let mut rng = StdRng::seed_from_u64(42);

        let incidence = 30f64.to_radians();
        let n = 1000;
        let mut in_lobe = 0;
        for _ in 0..n {
            let s = table.sample(incidence, &mut rng);
            assert!(!s.is_transmission(), "polar {}", s.polar);
            // Narrow lobe around theta = incidence, phi = 0 (or 2pi)
            let phi = s.azimuth.min(2.0 * PI - s.azimuth);
            if (s.polar - incidence).abs() < 0.35 && phi < 0.6 {
                in_lobe += 1;
            }
        }
        assert!(in_lobe > n / 2, "{} of {} samples in the lobe", in_lobe, n);
    }

    #[test]
    fn test_dielectric_table_mostly_transmits() {
        let table = BsdfTable::build(1.0, 1.5, 0.0, &Ggx::new(0.2), small());
        let mut rng = StdRng::seed_from_u64(42);

        let n = 2000;
        let transmitted = (0..n)
            .filter(|_| table.sample(0.1, &mut rng).is_transmission())
            .count();
        // Fresnel reflectance near normal incidence is about 4%
        let fraction = transmitted as f64 / n as f64;
        assert!(fraction > 0.85, "transmitted fraction {}", fraction);
        assert!(table.albedo(1.0) > 0.5);
    }

    #[test]
    fn test_rough_glass_reflects_fresnel_share() {
        let resolution = BsdfResolution {
            incidence: 9,
            azimuth: 129,
            polar: 129,
        };
        // Bucket 1 of 9 sits exactly at cos = 0.875
        let incidence = 0.875f64.acos();
        let incident = DVec3::new(incidence.sin(), 0.0, -incidence.cos());
        let expected = Fresnel::new(DVec3::Z, incident, 1.0, 1.5).reflectance();

        for alpha in [0.05, 0.2] {
            let table = BsdfTable::build(1.0, 1.5, 0.0, &Ggx::new(alpha), resolution);
            let mut rng = StdRng::seed_from_u64(42);
            let n = 20_000;
            let reflected = (0..n)
                .filter(|_| !table.sample(incidence, &mut rng).is_transmission())
                .count();
            let share = reflected as f64 / n as f64;
            assert!(
                (share - expected).abs() < 0.01,
                "alpha {}: reflected share {} against {}",
                alpha,
                share,
                expected
            );
        }
    }

    #[test]
    fn test_horizon_counts_as_transmission() {
        let at = |polar| BsdfSample { azimuth: 0.0, polar }.is_transmission();
        assert!(!at(FRAC_PI_2 - 1e-9));
        assert!(at(FRAC_PI_2));
        assert!(at(PI));
    }

    #[test]
    fn test_resolution_from_config_is_clamped() {
        let resolution: BsdfResolution = BsdfResolutionConfig {
            incidence: 1,
            azimuth: 0,
            polar: 17,
        }
        .into();
        assert_eq!(resolution.incidence, 2);
        assert_eq!(resolution.azimuth, 2);
        assert_eq!(resolution.polar, 17);
    }
}
