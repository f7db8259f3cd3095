//! Render statistics.
//!
//! Each worker owns a `RenderStats` and the orchestrator merges them when
//! the workers join. Nothing here is global.

use std::fmt;
use std::time::Duration;

/// Counters gathered while tracing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderStats {
    /// Paths started.
    pub paths: u64,
    /// Intersection queries that found a surface.
    pub intersections: u64,
    pub escaped: u64,
    pub absorbed: u64,
    pub scatter_errors: u64,
    pub bounce_overflows: u64,
    pub elapsed: Duration,
}

impl RenderStats {
    /// Paths discarded because of an error.
    pub fn errors(&self) -> u64 {
        self.scatter_errors + self.bounce_overflows
    }

    /// Add another worker's counters. Wall time is taken as the longer one.
    pub fn merge(&mut self, other: &RenderStats) {
        self.paths += other.paths;
        self.intersections += other.intersections;
        self.escaped += other.escaped;
        self.absorbed += other.absorbed;
        self.scatter_errors += other.scatter_errors;
        self.bounce_overflows += other.bounce_overflows;
        self.elapsed = self.elapsed.max(other.elapsed);
    }
}

impl fmt::Display for RenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} paths, {} intersections, {} escaped, {} absorbed, {} errors ({} scatter, {} bounce overflow) in {:.2?}",
            self.paths,
            self.intersections,
            self.escaped,
            self.absorbed,
            self.errors(),
            self.scatter_errors,
            self.bounce_overflows,
            self.elapsed
        )
    }
}
