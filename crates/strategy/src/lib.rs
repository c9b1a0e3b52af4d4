pub mod config;
pub mod detector;
pub mod indicators;
pub mod regime;
pub mod registry;

pub use config::{default_patterns, PatternConfig};
pub use detector::CatalystDetector;
pub use regime::regime_trend;
pub use registry::build_pattern;

use common::{Bar, Direction, PatternType};

/// A pattern fired on the latest bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatternHit {
    pub direction: Direction,
    /// Strength in [0, 1].
    pub rank: f64,
}

/// All catalyst patterns must satisfy this trait.
pub trait Pattern: Send + Sync {
    fn pattern_type(&self) -> PatternType;

    /// Bars required before `evaluate` can say anything.
    fn min_bars(&self) -> usize;

    /// Evaluate the pattern on the last bar of `bars` (oldest first).
    ///
    /// Must be a pure function of `bars`. Returns `None` when the pattern
    /// does not fire or there is not enough history.
    fn evaluate(&self, bars: &[Bar]) -> Option<PatternHit>;
}
