/// Range of ray parameters `[min, max]` a hit must fall in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: f64,
    pub max: f64,
}

impl Interval {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Everything from `min` on.
    pub fn starting_at(min: f64) -> Self {
        Self::new(min, f64::INFINITY)
    }

    /// Strict containment; a hit exactly at either end is rejected.
    #[inline]
    pub fn surrounds(&self, t: f64) -> bool {
        self.min < t && t < self.max
    }

    /// Same start, end pulled in to `max` if that is closer.
    #[inline]
    pub fn clipped(&self, max: f64) -> Self {
        Self::new(self.min, self.max.min(max))
    }
}
