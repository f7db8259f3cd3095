//! Piecewise-linear 1-D probability distributions.
//!
//! A density is tabulated at sorted sample values and treated as affine
//! between neighbours. Sampling picks a segment through the cumulative
//! (trapezoidal) integral, then inverts the affine density inside that
//! segment exactly, so a sloped segment is not sampled as if it were flat.
//!
//! Both the emitters and the rough BSDF tables sample through this type.

use std::collections::BTreeSet;

use rand::RngCore;

use crate::sampling::gen_f64;

/// Worst-case relative area mismatch accepted by [`PiecewiseLinearDistribution::simplify`].
pub const SIMPLIFY_TOLERANCE: f64 = 0.05;

/// Relative density difference below which a segment is sampled linearly.
const SLOPE_TOLERANCE: f64 = 1e-9;

/// Tabulated density with cumulative integral and an equal-probability lookup.
#[derive(Debug, Clone, Default)]
pub struct PiecewiseLinearDistribution {
    values: Vec<f64>,
    densities: Vec<f64>,
    /// `cumulative[i]` is the mass between `values[0]` and `values[i + 1]`.
    cumulative: Vec<f64>,
    /// `lookup[k]` is the first segment whose cumulative mass reaches
    /// `k / (lookup.len() - 1)` of the total.
    lookup: Vec<usize>,
}

impl PiecewiseLinearDistribution {
    /// Build from sorted `values` and their densities. The lookup table gets
    /// one entry per point.
    ///
    /// Fewer than two points gives a degenerate distribution that always
    /// returns its single value (or 0).
    pub fn new(values: Vec<f64>, densities: Vec<f64>) -> Self {
        let lookup_size = values.len().min(densities.len());
        Self::with_lookup(values, densities, lookup_size)
    }

    /// Build with an explicit lookup resolution. A resolution below 2
    /// disables the table and sampling scans from the first segment.
    pub fn with_lookup(mut values: Vec<f64>, mut densities: Vec<f64>, lookup_size: usize) -> Self {
        let n = values.len().min(densities.len());
        values.truncate(n);
        densities.truncate(n);
        for d in &mut densities {
            // Negative or NaN densities carry no mass
            if !(*d > 0.0) {
                *d = 0.0;
            }
        }

        let mut cumulative = Vec::with_capacity(n.saturating_sub(1));
        let mut sum = 0.0;
        for i in 1..n {
            sum += (densities[i - 1] + densities[i]) * 0.5 * (values[i] - values[i - 1]);
            cumulative.push(sum);
        }

        let mut dist = Self {
            values,
            densities,
            cumulative,
            lookup: Vec::new(),
        };
        dist.rebuild_lookup(lookup_size);
        dist
    }

    /// Build from `(value, density)` pairs.
    pub fn from_points(points: &[(f64, f64)]) -> Self {
        let (values, densities) = points.iter().copied().unzip();
        Self::new(values, densities)
    }

    fn rebuild_lookup(&mut self, lookup_size: usize) {
        self.lookup.clear();
        if lookup_size < 2 || self.cumulative.is_empty() {
            return;
        }
        let total = self.total();
        let last_segment = self.cumulative.len() - 1;
        let mut segment = 0;
        for k in 0..lookup_size {
            let target = k as f64 * total / (lookup_size - 1) as f64;
            while segment < last_segment && self.cumulative[segment] < target {
                segment += 1;
            }
            self.lookup.push(segment);
        }
    }

    /// True when fewer than two points were given.
    pub fn is_degenerate(&self) -> bool {
        self.cumulative.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn densities(&self) -> &[f64] {
        &self.densities
    }

    /// Total mass (last cumulative entry).
    pub fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    /// Draw a value. `u1` selects the cumulative mass `u1 * total`, `u2`
    /// places the sample inside the bracketing segment.
    pub fn sample(&self, u1: f64, u2: f64) -> f64 {
        if self.is_degenerate() {
            return self.values.first().copied().unwrap_or(0.0);
        }
        let u1 = u1.clamp(0.0, 1.0);
        let target = u1 * self.total();
        let last_segment = self.cumulative.len() - 1;

        let mut segment = if self.lookup.len() >= 2 {
            let slot = ((u1 * (self.lookup.len() - 1) as f64).floor() as usize).min(self.lookup.len() - 1);
            self.lookup[slot].min(last_segment)
        } else {
            0
        };
        while self.cumulative[segment] < target && segment < last_segment {
            segment += 1;
        }

        let (p0, p1) = (self.densities[segment], self.densities[segment + 1]);
        let mut t = u2.clamp(0.0, 1.0);
        if (p1 - p0).abs() > SLOPE_TOLERANCE * (p0 + p1) {
            // Solve p0 t + (p1 - p0) t^2 / 2 = u2 (p0 + p1) / 2 for t
            t = (((p0 * p0 * (1.0 - t) + p1 * p1 * t).sqrt() - p0) / (p1 - p0)).clamp(0.0, 1.0);
        }

        let (v0, v1) = (self.values[segment], self.values[segment + 1]);
        v0 + t * (v1 - v0)
    }

    /// Draw a value with two uniforms from `rng`.
    pub fn sample_with(&self, rng: &mut dyn RngCore) -> f64 {
        let u1 = gen_f64(rng);
        let u2 = gen_f64(rng);
        self.sample(u1, u2)
    }

    /// Cumulative mass at a fractional point index, interpolated linearly
    /// between tabulated entries.
    pub fn cumulative_at(&self, position: f64) -> f64 {
        if position <= 0.0 || self.is_degenerate() {
            return 0.0;
        }
        let last = (self.values.len() - 1) as f64;
        if position >= last {
            return self.total();
        }
        let index = position.floor() as usize;
        let frac = position - index as f64;
        let below = if index < 1 { 0.0 } else { self.cumulative[index - 1] };
        if frac == 0.0 {
            return below;
        }
        below + (self.cumulative[index] - below) * frac
    }

    /// Fractional point index of `value`, clamped to the tabulated range.
    pub fn position_of(&self, value: f64) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let last_segment = self.values.len() - 2;
        let segment = self
            .values
            .partition_point(|&v| v <= value)
            .saturating_sub(1)
            .min(last_segment);
        let (v0, v1) = (self.values[segment], self.values[segment + 1]);
        let frac = if v1 > v0 {
            ((value - v0) / (v1 - v0)).clamp(0.0, 1.0)
        } else {
            0.0
        };
        segment as f64 + frac
    }

    /// Reduce the point set while keeping the curve shape.
    ///
    /// Keeps the first and last points and every local extremum, then keeps
    /// inserting, per interval between kept points, the point farthest from
    /// the chord until every interval's area mismatch is within
    /// [`SIMPLIFY_TOLERANCE`] of `max density * interval width`.
    ///
    /// Returns the reduced distribution and, for each kept point, its index
    /// in `self`.
    pub fn simplify(&self) -> (Self, Vec<usize>) {
        self.simplify_keeping(&[])
    }

    /// [`simplify`](Self::simplify) with extra indices that must survive.
    /// Out-of-range indices are ignored.
    pub fn simplify_keeping(&self, required: &[usize]) -> (Self, Vec<usize>) {
        self.reduce(SIMPLIFY_TOLERANCE, required, false)
    }

    /// [`simplify`](Self::simplify) over sections split at `boundaries`.
    ///
    /// The boundaries are kept, and each interval is measured against the
    /// largest density of its own section instead of the whole curve, so a
    /// faint section keeps its shape next to a bright one.
    pub fn simplify_sections(&self, boundaries: &[usize]) -> (Self, Vec<usize>) {
        self.reduce(SIMPLIFY_TOLERANCE, boundaries, true)
    }

    /// [`simplify`](Self::simplify) with a different area tolerance.
    pub fn simplify_within(&self, tolerance: f64) -> (Self, Vec<usize>) {
        self.reduce(tolerance, &[], false)
    }

    fn reduce(&self, tolerance: f64, required: &[usize], sectioned: bool) -> (Self, Vec<usize>) {
        let n = self.values.len();
        if n < 3 {
            return (self.clone(), (0..n).collect());
        }

        let mut bounds: Vec<usize> = required.iter().copied().filter(|&i| i < n).collect();
        bounds.extend([0, n - 1]);
        bounds.sort_unstable();
        bounds.dedup();

        let mut kept: BTreeSet<usize> = bounds.iter().copied().collect();
        for i in 1..n - 1 {
            let (a, b, c) = (self.densities[i - 1], self.densities[i], self.densities[i + 1]);
            if (a < b) != (b < c) {
                kept.insert(i);
            }
        }

        // Normaliser per section; a single section unless `sectioned`
        let section_max: Vec<f64> = if sectioned {
            bounds
                .windows(2)
                .map(|w| self.densities[w[0]..=w[1]].iter().copied().fold(0.0, f64::max))
                .collect()
        } else {
            vec![self.max_density()]
        };
        let scale_of = |start: usize| {
            if sectioned {
                let section = bounds.partition_point(|&b| b <= start).saturating_sub(1);
                section_max[section.min(section_max.len() - 1)]
            } else {
                section_max[0]
            }
        };

        if section_max.iter().any(|&m| m > 0.0) {
            loop {
                let before = kept.len();
                let snapshot: Vec<usize> = kept.iter().copied().collect();
                for pair in snapshot.windows(2) {
                    let scale = scale_of(pair[0]);
                    if scale <= 0.0 {
                        continue;
                    }
                    let (deviation, worst) = self.chord_deviation(pair[0], pair[1], scale);
                    if deviation > tolerance {
                        if let Some(worst) = worst {
                            kept.insert(worst);
                        }
                    }
                }
                if kept.len() == before {
                    break;
                }
            }
        }

        let kept: Vec<usize> = kept.into_iter().collect();
        let values = kept.iter().map(|&i| self.values[i]).collect();
        let densities = kept.iter().map(|&i| self.densities[i]).collect();
        let lookup_size = kept.len();
        (Self::with_lookup(values, densities, lookup_size), kept)
    }

    /// Worst relative area mismatch between this curve and the chords
    /// through the `kept` indices.
    pub fn max_relative_deviation(&self, kept: &[usize]) -> f64 {
        let max_density = self.max_density();
        if max_density <= 0.0 {
            return 0.0;
        }
        kept.windows(2)
            .map(|pair| self.chord_deviation(pair[0], pair[1], max_density).0)
            .fold(0.0, f64::max)
    }

    fn max_density(&self) -> f64 {
        self.densities.iter().copied().fold(0.0, f64::max)
    }

    /// Relative area between the curve and the chord from `i1` to `i2`, and
    /// the interior index farthest from the chord.
    fn chord_deviation(&self, i1: usize, i2: usize, max_density: f64) -> (f64, Option<usize>) {
        let (v1, v2) = (self.values[i1], self.values[i2]);
        let width = v2 - v1;
        if i2 <= i1 + 1 || width <= 0.0 {
            return (0.0, None);
        }
        let (p1, p2) = (self.densities[i1], self.densities[i2]);

        let mut area = 0.0;
        let mut worst = None;
        let mut worst_gap = -1.0;
        for i in i1 + 1..i2 {
            let chord = p1 + (self.values[i] - v1) / width * (p2 - p1);
            let gap = (chord - self.densities[i]).abs();
            if gap > worst_gap {
                worst_gap = gap;
                worst = Some(i);
            }
            // Trapezoid weight of point i; the gap is zero at both ends
            area += gap * (self.values[i + 1] - self.values[i - 1]) * 0.5;
        }

        (area / (max_density * width), worst)
    }
}
