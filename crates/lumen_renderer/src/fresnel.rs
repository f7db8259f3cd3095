//! Fresnel reflectance and specular directions at a smooth interface.

use lumen_math::DVec3;

/// Interface between two media for one incident direction.
///
/// `n1` is the index on the incident side and `n2` the index on the far side.
/// The stored normal is flipped as needed so that it points along the
/// direction of propagation (`normal . incident > 0`).
#[derive(Debug, Clone, Copy)]
pub struct Fresnel {
    incident: DVec3,
    normal: DVec3,
    n1: f64,
    n2: f64,
    cos_incident: f64,
    /// `None` under total internal reflection.
    cos_transmitted: Option<f64>,
}

impl Fresnel {
    /// `normal` and `incident` must be unit vectors. `incident` is the
    /// travel direction of the arriving ray.
    pub fn new(normal: DVec3, incident: DVec3, n1: f64, n2: f64) -> Self {
        let mut normal = normal;
        let mut cos_incident = normal.dot(incident);
        if cos_incident < 0.0 {
            normal = -normal;
            cos_incident = -cos_incident;
        }
        let cos_incident = cos_incident.min(1.0);

        let cos_transmitted = if n1 == n2 {
            Some(cos_incident)
        } else {
            let eta = n1 / n2;
            let sin2_transmitted = eta * eta * (1.0 - cos_incident * cos_incident);
            (sin2_transmitted <= 1.0).then(|| (1.0 - sin2_transmitted).sqrt())
        };

        Self {
            incident,
            normal,
            n1,
            n2,
            cos_incident,
            cos_transmitted,
        }
    }

    /// Normal oriented along the direction of propagation.
    pub fn normal(&self) -> DVec3 {
        self.normal
    }

    pub fn cos_incident(&self) -> f64 {
        self.cos_incident
    }

    pub fn is_same_index(&self) -> bool {
        self.n1 == self.n2
    }

    pub fn is_total_internal_reflection(&self) -> bool {
        self.cos_transmitted.is_none()
    }

    /// Unpolarised reflectance, the mean of the s and p terms.
    pub fn reflectance(&self) -> f64 {
        if self.is_same_index() {
            return 0.0;
        }
        let Some(cos_t) = self.cos_transmitted else {
            return 1.0;
        };
        let cos_i = self.cos_incident;
        let rp = (self.n2 * cos_i - self.n1 * cos_t) / (self.n2 * cos_i + self.n1 * cos_t);
        let rs = (self.n1 * cos_i - self.n2 * cos_t) / (self.n1 * cos_i + self.n2 * cos_t);
        (rp * rp + rs * rs) * 0.5
    }

    /// Mirror direction.
    pub fn reflected(&self) -> DVec3 {
        (self.incident - self.normal * (2.0 * self.cos_incident)).normalize_or_zero()
    }

    /// Refracted direction (Snell), `None` under total internal reflection.
    pub fn refracted(&self) -> Option<DVec3> {
        if self.is_same_index() {
            return Some(self.incident);
        }
        let cos_t = self.cos_transmitted?;
        let eta = self.n1 / self.n2;
        let dir = self.incident * eta + self.normal * (cos_t - eta * self.cos_incident);
        Some(dir.normalize_or_zero())
    }
}
