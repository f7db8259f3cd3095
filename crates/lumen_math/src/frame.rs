//! Rotation and local-frame helpers shared by emitters, cameras and BSDF sampling.

use crate::DVec3;

/// Rotate `v` by `angle` radians about the unit vector `axis` (Rodrigues' formula).
#[inline]
pub fn rotate_about(v: DVec3, axis: DVec3, angle: f64) -> DVec3 {
    let (sin, cos) = angle.sin_cos();
    v * cos + axis.cross(v) * sin + axis * axis.dot(v) * (1.0 - cos)
}

/// Two unit vectors completing a right-handed frame around the unit vector `n`.
#[inline]
pub fn orthonormal_basis(n: DVec3) -> (DVec3, DVec3) {
    n.any_orthonormal_pair()
}

/// Partially specified axes of a right-handed frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameAxes {
    pub x: Option<DVec3>,
    pub y: Option<DVec3>,
    pub z: Option<DVec3>,
}

impl FrameAxes {
    fn get(&self, axis: usize) -> Option<DVec3> {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    /// Number of axes that were given.
    pub fn count(&self) -> usize {
        [self.x, self.y, self.z].iter().filter(|a| a.is_some()).count()
    }
}

/// Complete a right-handed orthonormal frame from at least two given axes.
///
/// `primary` (0=X, 1=Y, 2=Z) names the axis kept exactly; it must be among the
/// given ones. The other given axis is re-orthogonalised against it and the
/// remaining axis follows from the cross product. When all three are given,
/// the axis after `primary` (cyclically) is used and the third is recomputed.
///
/// Returns `None` for fewer than two axes, zero-length or parallel input.
pub fn complete_frame(axes: FrameAxes, primary: usize) -> Option<[DVec3; 3]> {
    if primary > 2 || axes.count() < 2 {
        return None;
    }
    let p = axes.get(primary)?.try_normalize()?;

    let next = (primary + 1) % 3;
    let prev = (primary + 2) % 3;
    let secondary = if axes.get(next).is_some() { next } else { prev };
    let s = axes.get(secondary)?;
    let s = (s - p * s.dot(p)).try_normalize()?;

    // axis[i + 2] = axis[i] x axis[i + 1]
    let t = if secondary == next { p.cross(s) } else { s.cross(p) };

    let mut frame = [DVec3::ZERO; 3];
    frame[primary] = p;
    frame[secondary] = s;
    frame[3 - primary - secondary] = t.normalize();
    Some(frame)
}
