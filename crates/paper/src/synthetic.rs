use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{Bar, Error, MarketDataSource, Quote, Result};

/// Bars of history a breakout compares against.
const BREAKOUT_LOOKBACK: usize = 20;
/// Intraday range around open/close.
const WICK: f64 = 0.004;

/// Shape of the generated tape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticProfile {
    pub days: usize,
    pub start: NaiveDate,
    /// Index of the newest breakout; earlier ones repeat every `event_spacing`
    /// bars before it. `None` puts it on the last bar.
    pub anchor: Option<usize>,
    pub event_spacing: usize,
    /// Cap on breakouts before the anchor.
    pub max_prior_events: Option<usize>,
    /// Abnormal return earned over `event_horizon` bars after each breakout.
    pub abnormal_return: f64,
    pub event_horizon: usize,
    pub benchmark_drift: f64,
    pub benchmark_vol: f64,
    /// Daily noise on top of the benchmark move.
    pub idiosyncratic_vol: f64,
    pub base_price: f64,
    pub base_volume: f64,
    /// Quoted spread as a fraction of price.
    pub quote_spread: Option<f64>,
}

impl Default for SyntheticProfile {
    fn default() -> Self {
        Self {
            days: 300,
            start: NaiveDate::from_ymd_opt(2023, 1, 2).unwrap_or(NaiveDate::MIN),
            anchor: None,
            event_spacing: 18,
            max_prior_events: None,
            abnormal_return: 0.02,
            event_horizon: 5,
            benchmark_drift: 0.0003,
            benchmark_vol: 0.003,
            idiosyncratic_vol: 0.002,
            base_price: 100.0,
            base_volume: 1_000_000.0,
            quote_spread: Some(0.0008),
        }
    }
}

/// Seeded market that plants volume breakouts with a known forward
/// abnormal return. Every ticker gets its own path over a shared benchmark;
/// identical seeds give identical bars.
#[derive(Debug, Clone)]
pub struct SyntheticMarket {
    profile: SyntheticProfile,
    seed: u64,
    benchmark_ticker: String,
}

impl SyntheticMarket {
    pub fn new(profile: SyntheticProfile, seed: u64, benchmark_ticker: impl Into<String>) -> Self {
        Self {
            profile,
            seed,
            benchmark_ticker: benchmark_ticker.into(),
        }
    }

    pub fn profile(&self) -> &SyntheticProfile {
        &self.profile
    }

    /// Bar indices carrying a planted breakout, oldest first.
    pub fn event_indices(&self) -> Vec<usize> {
        let p = &self.profile;
        if p.days <= BREAKOUT_LOOKBACK {
            return Vec::new();
        }
        let anchor = p.anchor.unwrap_or(p.days - 1).min(p.days - 1);
        let spacing = p.event_spacing.max(1);
        let cap = p.max_prior_events.map_or(usize::MAX, |n| n.saturating_add(1));

        let mut events = BTreeSet::new();
        let mut i = anchor;
        while i > BREAKOUT_LOOKBACK && events.len() < cap {
            events.insert(i);
            match i.checked_sub(spacing) {
                Some(next) => i = next,
                None => break,
            }
        }
        events.into_iter().collect()
    }

    /// Benchmark bars and their daily returns.
    fn benchmark(&self) -> (Vec<Bar>, Vec<f64>) {
        let p = &self.profile;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut level = p.base_price;
        let mut bars = Vec::with_capacity(p.days);
        let mut returns = Vec::with_capacity(p.days);

        for i in 0..p.days {
            let r = if i == 0 {
                0.0
            } else {
                p.benchmark_drift + noise(&mut rng, p.benchmark_vol)
            };
            let open = level;
            level *= 1.0 + r;
            returns.push(r);
            bars.push(make_bar(p.start, i, open, level, p.base_volume));
        }
        (bars, returns)
    }

    fn asset(&self, ticker: &str, benchmark_returns: &[f64]) -> Vec<Bar> {
        let p = &self.profile;
        let mut rng = StdRng::seed_from_u64(self.seed ^ ticker_hash(ticker));
        let events: BTreeSet<usize> = self.event_indices().into_iter().collect();
        let horizon = p.event_horizon.max(1);
        let boost = (1.0 + p.abnormal_return).powf(1.0 / horizon as f64) - 1.0;

        let mut bars: Vec<Bar> = Vec::with_capacity(p.days);
        let mut level = p.base_price;
        let mut boost_left = 0usize;

        for (i, &bench) in benchmark_returns.iter().enumerate() {
            let open = level;
            if i > 0 {
                let extra = if boost_left > 0 {
                    boost_left -= 1;
                    boost
                } else {
                    0.0
                };
                level *= (1.0 + bench) * (1.0 + noise(&mut rng, p.idiosyncratic_vol)) * (1.0 + extra);
            }
            let mut volume = p.base_volume * (1.0 + rng.gen_range(-0.1..0.1));

            if events.contains(&i) {
                let prior_high = bars[i - BREAKOUT_LOOKBACK..]
                    .iter()
                    .map(|b| b.high)
                    .fold(f64::MIN, f64::max);
                level = level.max(prior_high * 1.01);
                volume = p.base_volume * 5.0;
                boost_left = horizon;
            }
            bars.push(make_bar(p.start, i, open, level, volume));
        }
        bars
    }

    /// Full history of `ticker`, which may be the benchmark itself.
    pub fn series(&self, ticker: &str) -> Vec<Bar> {
        let (bench, returns) = self.benchmark();
        if ticker.eq_ignore_ascii_case(&self.benchmark_ticker) {
            bench
        } else {
            self.asset(ticker, &returns)
        }
    }
}

#[async_trait]
impl MarketDataSource for SyntheticMarket {
    async fn fetch_history(&self, ticker: &str, lookback_days: u32) -> Result<Vec<Bar>> {
        if ticker.trim().is_empty() {
            return Err(Error::NotFound("empty ticker".into()));
        }
        let bars = self.series(ticker);
        let keep = (lookback_days as usize).min(bars.len());
        debug!(ticker, bars = keep, "Synthetic history generated");
        Ok(bars[bars.len() - keep..].to_vec())
    }

    async fn fetch_quote(&self, ticker: &str) -> Result<Quote> {
        let last = self
            .series(ticker)
            .last()
            .copied()
            .ok_or_else(|| Error::NotFound(format!("no synthetic bars for {ticker}")))?;
        Ok(Quote {
            price: last.close,
            spread: self.profile.quote_spread,
        })
    }
}

/// Zero-mean uniform noise with standard deviation `sd`.
fn noise(rng: &mut StdRng, sd: f64) -> f64 {
    if sd <= 0.0 {
        return 0.0;
    }
    rng.gen_range(-1.0..1.0) * sd * 3f64.sqrt()
}

fn make_bar(start: NaiveDate, i: usize, open: f64, close: f64, volume: f64) -> Bar {
    Bar {
        date: start + Duration::days(i as i64),
        open,
        high: open.max(close) * (1.0 + WICK),
        low: open.min(close) * (1.0 - WICK),
        close,
        volume,
    }
}

/// FNV-1a, so each ticker's path is stable across runs and platforms.
fn ticker_hash(ticker: &str) -> u64 {
    ticker
        .to_ascii_uppercase()
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325, |h, b| {
            (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Direction, PatternType};
    use strategy::{CatalystDetector, PatternConfig};

    fn market(profile: SyntheticProfile) -> SyntheticMarket {
        SyntheticMarket::new(profile, 7, "SPY")
    }

    #[test]
    fn events_are_anchored_and_spaced() {
        let m = market(SyntheticProfile {
            anchor: Some(250),
            ..SyntheticProfile::default()
        });
        let events = m.event_indices();
        assert_eq!(events.len(), 13);
        assert_eq!(events.last(), Some(&250));
        assert_eq!(events[0], 250 - 12 * 18);

        let capped = market(SyntheticProfile {
            anchor: Some(250),
            max_prior_events: Some(3),
            ..SyntheticProfile::default()
        });
        assert_eq!(capped.event_indices(), vec![196, 214, 232, 250]);
    }

    #[test]
    fn same_seed_same_tape_different_tickers_differ() {
        let m = market(SyntheticProfile::default());
        assert_eq!(m.series("ACME"), m.series("ACME"));
        assert_ne!(m.series("ACME"), m.series("GLOBEX"));
        assert_eq!(m.series("SPY").len(), 300);
    }

    #[test]
    fn planted_breakouts_are_the_only_detections() {
        let m = market(SyntheticProfile {
            anchor: Some(250),
            ..SyntheticProfile::default()
        });
        let bars = m.series("ACME");
        let detector = CatalystDetector::from_config(&[PatternConfig::new("volume_breakout")]).unwrap();
        let found = detector.occurrences(&bars[..=250], PatternType::VolumeBreakout, Direction::Long);
        let expected: Vec<usize> = m.event_indices().into_iter().filter(|&i| i < 250).collect();
        assert_eq!(found, expected);

        let live = detector.detect("ACME", &bars[..=250]).unwrap().unwrap();
        assert_eq!(live.direction, Direction::Long);
    }

    #[test]
    fn forward_abnormal_return_matches_the_plant() {
        let m = market(SyntheticProfile {
            anchor: Some(250),
            ..SyntheticProfile::default()
        });
        let (asset, bench) = (m.series("ACME"), m.series("SPY"));
        for t in m.event_indices().into_iter().filter(|&i| i < 250) {
            let a = asset[t + 5].close / asset[t].close - 1.0;
            let b = bench[t + 5].close / bench[t].close - 1.0;
            assert!((a - b - 0.02).abs() < 0.02, "event {t}: {}", a - b);
        }
    }

    #[tokio::test]
    async fn history_respects_lookback_and_quote_uses_last_close() {
        let m = market(SyntheticProfile::default());
        let bars = m.fetch_history("ACME", 120).await.unwrap();
        assert_eq!(bars.len(), 120);
        let quote = m.fetch_quote("ACME").await.unwrap();
        assert_eq!(quote.price, bars.last().unwrap().close);
        assert_eq!(quote.spread, Some(0.0008));
    }
}
