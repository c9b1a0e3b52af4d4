use std::collections::HashMap;

use common::{Bar, Direction, PatternType};

use crate::config::PatternConfig;
use crate::indicators::{atr, MacdIndicator, MacdSignal, RsiIndicator};
use crate::indicators::rsi::RsiCross;
use crate::{Pattern, PatternHit};

/// ATR period used to normalize MACD gaps into a rank.
const RANK_ATR_PERIOD: usize = 14;

// ─── Pattern builders ─────────────────────────────────────────────────────────

/// Build one pattern from its config entry. Unknown types and invalid
/// parameter combinations are reported as errors.
pub fn build_pattern(cfg: &PatternConfig) -> Result<Box<dyn Pattern>, String> {
    match cfg.pattern_type.as_str() {
        "volume_breakout" => {
            let lookback = param_usize(&cfg.params, "lookback", 20);
            let volume_mult = param_f64(&cfg.params, "volume_mult", 2.0);
            if lookback == 0 {
                return Err("volume_breakout lookback must be >= 1".into());
            }
            if volume_mult <= 0.0 {
                return Err("volume_breakout volume_mult must be positive".into());
            }
            Ok(Box::new(VolumeBreakout { lookback, volume_mult }))
        }
        "macd_cross" => {
            let fast = param_usize(&cfg.params, "fast", 12);
            let slow = param_usize(&cfg.params, "slow", 26);
            let signal = param_usize(&cfg.params, "signal", 9);
            if fast == 0 || fast >= slow || signal == 0 {
                return Err(format!(
                    "macd_cross needs 0 < fast < slow and signal >= 1, got {fast}/{slow}/{signal}"
                ));
            }
            Ok(Box::new(MacdCross {
                indicator: MacdIndicator::new(fast, slow, signal),
            }))
        }
        "rsi_reversal" => {
            let period = param_usize(&cfg.params, "period", 14);
            let overbought = param_f64(&cfg.params, "overbought", 70.0);
            let oversold = param_f64(&cfg.params, "oversold", 30.0);
            if period < 2 || oversold >= overbought {
                return Err(format!(
                    "rsi_reversal needs period >= 2 and oversold < overbought, got {period}/{oversold}/{overbought}"
                ));
            }
            Ok(Box::new(RsiReversal {
                indicator: RsiIndicator::new(period, overbought, oversold),
            }))
        }
        other => Err(format!("unknown type '{other}'")),
    }
}

fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
        .unwrap_or(default)
}

fn param_usize(params: &HashMap<String, toml::Value>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(|v| v.as_integer())
        .map(|v| v.max(0) as usize)
        .unwrap_or(default)
}

// ─── Concrete pattern types ───────────────────────────────────────────────────

/// Close breaks out of the prior `lookback`-bar range on heavy volume.
#[derive(Debug, Clone)]
struct VolumeBreakout {
    lookback: usize,
    volume_mult: f64,
}

impl Pattern for VolumeBreakout {
    fn pattern_type(&self) -> PatternType {
        PatternType::VolumeBreakout
    }

    fn min_bars(&self) -> usize {
        self.lookback + 1
    }

    fn evaluate(&self, bars: &[Bar]) -> Option<PatternHit> {
        if bars.len() < self.min_bars() {
            return None;
        }
        let (last, rest) = bars.split_last()?;
        let prior = &rest[rest.len() - self.lookback..];

        let avg_volume = prior.iter().map(|b| b.volume).sum::<f64>() / self.lookback as f64;
        if avg_volume <= 0.0 {
            return None;
        }
        let ratio = last.volume / avg_volume;
        if ratio < self.volume_mult {
            return None;
        }

        let prior_high = prior.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let prior_low = prior.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let direction = if last.close > prior_high {
            Direction::Long
        } else if last.close < prior_low {
            Direction::Short
        } else {
            return None;
        };

        // 0.5 at exactly the threshold, approaching 1 as volume explodes.
        let rank = ratio / (ratio + self.volume_mult);
        Some(PatternHit { direction, rank })
    }
}

/// MACD line crossing its signal line.
#[derive(Debug, Clone)]
struct MacdCross {
    indicator: MacdIndicator,
}

impl Pattern for MacdCross {
    fn pattern_type(&self) -> PatternType {
        PatternType::MacdCross
    }

    fn min_bars(&self) -> usize {
        self.indicator.min_len().max(RANK_ATR_PERIOD + 1)
    }

    fn evaluate(&self, bars: &[Bar]) -> Option<PatternHit> {
        if bars.len() < self.min_bars() {
            return None;
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let reading = self.indicator.compute(&closes)?;
        let direction = match reading.signal {
            MacdSignal::Bullish => Direction::Long,
            MacdSignal::Bearish => Direction::Short,
            MacdSignal::Neutral => return None,
        };

        let rank = match atr(bars, RANK_ATR_PERIOD) {
            Some(range) if range > 0.0 => (reading.gap() / range).tanh(),
            _ => 0.5,
        };
        Some(PatternHit {
            direction,
            rank: rank.clamp(0.0, 1.0),
        })
    }
}

/// RSI leaving an oversold or overbought band.
#[derive(Debug, Clone)]
struct RsiReversal {
    indicator: RsiIndicator,
}

impl Pattern for RsiReversal {
    fn pattern_type(&self) -> PatternType {
        PatternType::RsiReversal
    }

    fn min_bars(&self) -> usize {
        self.indicator.period + 2
    }

    fn evaluate(&self, bars: &[Bar]) -> Option<PatternHit> {
        if bars.len() < self.min_bars() {
            return None;
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let band = self.indicator.overbought - self.indicator.oversold;

        let (direction, swing) = match self.indicator.crossing(&closes)? {
            RsiCross::UpFromOversold { previous, current } => (Direction::Long, current - previous),
            RsiCross::DownFromOverbought { previous, current } => {
                (Direction::Short, previous - current)
            }
        };
        Some(PatternHit {
            direction,
            rank: (swing / band).clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn flat_bars(n: usize) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        (0..n)
            .map(|i| Bar {
                date: start + Duration::days(i as i64),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1_000.0,
            })
            .collect()
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(build_pattern(&PatternConfig::new("head_and_shoulders")).is_err());
    }

    #[test]
    fn invalid_macd_periods_are_rejected() {
        let cfg = PatternConfig::new("macd_cross")
            .with_param("fast", 26)
            .with_param("slow", 12);
        assert!(build_pattern(&cfg).is_err());
    }

    #[test]
    fn integer_params_are_accepted_for_floats() {
        let cfg = PatternConfig::new("volume_breakout").with_param("volume_mult", 3);
        let pattern = build_pattern(&cfg).unwrap();
        let mut bars = flat_bars(25);
        let last = bars.last_mut().unwrap();
        last.close = 102.0;
        last.high = 102.5;
        last.volume = 2_500.0; // 2.5x: below the 3x threshold
        assert!(pattern.evaluate(&bars).is_none());
    }

    #[test]
    fn volume_breakout_fires_long_on_range_break() {
        let pattern = build_pattern(&PatternConfig::new("volume_breakout")).unwrap();
        let mut bars = flat_bars(25);
        let last = bars.last_mut().unwrap();
        last.close = 102.0;
        last.high = 102.5;
        last.volume = 3_000.0;
        let hit = pattern.evaluate(&bars).unwrap();
        assert_eq!(hit.direction, Direction::Long);
        assert!((hit.rank - 0.6).abs() < 1e-9, "rank {}", hit.rank);
    }

    #[test]
    fn volume_breakout_fires_short_on_range_break_down() {
        let pattern = build_pattern(&PatternConfig::new("volume_breakout")).unwrap();
        let mut bars = flat_bars(25);
        let last = bars.last_mut().unwrap();
        last.close = 97.0;
        last.low = 96.5;
        last.volume = 2_000.0;
        assert_eq!(pattern.evaluate(&bars).unwrap().direction, Direction::Short);
    }

    #[test]
    fn volume_without_breakout_is_ignored() {
        let pattern = build_pattern(&PatternConfig::new("volume_breakout")).unwrap();
        let mut bars = flat_bars(25);
        bars.last_mut().unwrap().volume = 10_000.0;
        assert!(pattern.evaluate(&bars).is_none());
    }

    #[test]
    fn rsi_reversal_ranks_within_unit_interval() {
        let cfg = PatternConfig::new("rsi_reversal").with_param("period", 3);
        let pattern = build_pattern(&cfg).unwrap();
        let mut bars = flat_bars(7);
        for (bar, close) in bars
            .iter_mut()
            .zip([20.0, 19.0, 18.0, 17.0, 16.0, 15.0, 18.0])
        {
            bar.close = close;
            bar.high = close + 0.5;
            bar.low = close - 0.5;
        }
        let hit = pattern.evaluate(&bars).unwrap();
        assert_eq!(hit.direction, Direction::Long);
        assert!((0.0..=1.0).contains(&hit.rank));
    }
}
