use tracing::{debug, info};

use common::{Bar, CatalystSignal, Direction, Error, PatternType, Result};

use crate::config::PatternConfig;
use crate::registry::build_pattern;
use crate::Pattern;

/// Scans a bar sequence for the configured catalyst patterns.
///
/// Detection is a pure function of the bars: identical input yields an
/// identical signal, which backtests and tests rely on.
pub struct CatalystDetector {
    patterns: Vec<Box<dyn Pattern>>,
}

impl CatalystDetector {
    pub fn new(patterns: Vec<Box<dyn Pattern>>) -> Self {
        Self { patterns }
    }

    /// Build the detector from config entries, in declaration order.
    pub fn from_config(configs: &[PatternConfig]) -> Result<Self> {
        if configs.is_empty() {
            return Err(Error::Config("at least one [[pattern]] is required".into()));
        }
        let mut patterns = Vec::with_capacity(configs.len());
        for cfg in configs {
            let pattern = build_pattern(cfg).map_err(|e| {
                Error::Config(format!("pattern '{}': {e}", cfg.pattern_type))
            })?;
            info!(pattern = %pattern.pattern_type(), min_bars = pattern.min_bars(), "Registered pattern");
            patterns.push(pattern);
        }
        Ok(Self { patterns })
    }

    /// Bars needed to evaluate every configured pattern.
    pub fn min_bars(&self) -> usize {
        self.patterns.iter().map(|p| p.min_bars()).max().unwrap_or(0)
    }

    /// Evaluate all patterns on the last bar and return the strongest hit.
    /// Ties go to the pattern declared first.
    pub fn detect(&self, ticker: &str, bars: &[Bar]) -> Result<Option<CatalystSignal>> {
        let required = self.min_bars();
        if bars.len() < required {
            return Err(Error::InsufficientHistory {
                required,
                available: bars.len(),
            });
        }
        let Some(last) = bars.last() else {
            return Ok(None);
        };

        let mut best: Option<(PatternType, crate::PatternHit)> = None;
        for pattern in &self.patterns {
            if let Some(hit) = pattern.evaluate(bars) {
                debug!(ticker, pattern = %pattern.pattern_type(), rank = hit.rank, "Pattern fired");
                if best.map_or(true, |(_, b)| hit.rank > b.rank) {
                    best = Some((pattern.pattern_type(), hit));
                }
            }
        }

        Ok(best.map(|(pattern_type, hit)| CatalystSignal {
            ticker: ticker.to_string(),
            pattern_type,
            detected_at: last.date,
            rank: hit.rank,
            direction: hit.direction,
        }))
    }

    /// Every earlier bar index where `pattern_type` fired in `direction`.
    ///
    /// The last bar is excluded: it is the live signal, not history.
    pub fn occurrences(
        &self,
        bars: &[Bar],
        pattern_type: PatternType,
        direction: Direction,
    ) -> Vec<usize> {
        let Some(pattern) = self
            .patterns
            .iter()
            .find(|p| p.pattern_type() == pattern_type)
        else {
            return Vec::new();
        };
        if bars.len() < 2 {
            return Vec::new();
        }

        let first = pattern.min_bars().max(1) - 1;
        (first..bars.len() - 1)
            .filter(|&i| {
                pattern
                    .evaluate(&bars[..=i])
                    .is_some_and(|hit| hit.direction == direction)
            })
            .collect()
    }
}
