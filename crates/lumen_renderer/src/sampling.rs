//! Random and low-discrepancy number helpers.

use rand::{Rng, RngCore};

/// Uniform sample in [0, 1).
#[inline]
pub fn gen_f64(rng: &mut dyn RngCore) -> f64 {
    rng.gen::<f64>()
}

/// Radical inverse of `index` in `base` (one coordinate of a Halton sequence).
pub fn halton(mut index: u64, base: u64) -> f64 {
    let inv_base = 1.0 / base as f64;
    let mut f = 1.0;
    let mut result = 0.0;
    while index > 0 {
        f *= inv_base;
        result += f * (index % base) as f64;
        index /= base;
    }
    result
}

/// Polar angle of a cosine-weighted hemisphere sample (sin^2 theta uniform).
#[inline]
pub fn cosine_polar_angle(u: f64) -> f64 {
    u.clamp(0.0, 1.0).sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_halton_base2() {
        let expected = [0.0, 0.5, 0.25, 0.75, 0.125, 0.625];
        for (i, e) in expected.iter().enumerate() {
            assert!((halton(i as u64, 2) - e).abs() < 1e-15);
        }
    }

    #[test]
    fn test_halton_base3() {
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-15);
        assert!((halton(2, 3) - 2.0 / 3.0).abs() < 1e-15);
        assert!((halton(3, 3) - 1.0 / 9.0).abs() < 1e-15);
    }

    #[test]
    fn test_gen_f64_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..1000 {
            let x = gen_f64(&mut rng);
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_cosine_polar_angle_mean() {
        // E[cos theta] for a cosine-weighted hemisphere is 2/3
        let n = 10_000;
        let mean: f64 = (0..n)
            .map(|i| cosine_polar_angle((i as f64 + 0.5) / n as f64).cos())
            .sum::<f64>()
            / n as f64;
        assert!((mean - 2.0 / 3.0).abs() < 1e-3);
    }
}
