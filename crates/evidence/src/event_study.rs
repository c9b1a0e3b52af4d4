use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{Bar, Direction, Error, EvidenceRecord, Result};

use crate::stats::{bootstrap_mean_ci, mean, median, t_test};

/// Event-study settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    /// Forward horizons in bars.
    pub horizons: Vec<usize>,
    /// Horizon the economics model prices off.
    pub primary_horizon: usize,
    /// Below this many events every statistic is reported as absent. At
    /// least 2, the smallest sample a t-test accepts.
    pub min_events: usize,
    /// Significance level for the two-sided t-test.
    pub alpha: f64,
    /// Coverage of the bootstrap confidence interval.
    pub confidence: f64,
    pub bootstrap_resamples: usize,
    pub seed: u64,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            horizons: vec![1, 5, 10],
            primary_horizon: 5,
            min_events: 10,
            alpha: 0.05,
            confidence: 0.95,
            bootstrap_resamples: 2000,
            seed: 7,
        }
    }
}

/// Cumulative-abnormal-return analysis of historical pattern occurrences.
///
/// Returns are directional: for a short signal a falling underlying counts
/// as a positive abnormal return.
#[derive(Debug, Clone)]
pub struct EventStudy {
    config: EvidenceConfig,
}

impl EventStudy {
    pub fn new(config: EvidenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvidenceConfig {
        &self.config
    }

    /// Directional abnormal return after each event over `horizon` bars.
    ///
    /// Events without `horizon` forward bars, or whose start or end date is
    /// missing from the benchmark, are skipped.
    pub fn abnormal_returns(
        bars: &[Bar],
        benchmark: &[Bar],
        events: &[usize],
        horizon: usize,
        direction: Direction,
    ) -> Vec<f64> {
        let bench: HashMap<_, f64> = benchmark.iter().map(|b| (b.date, b.close)).collect();

        events
            .iter()
            .filter_map(|&t| {
                let start = bars.get(t)?;
                let end = bars.get(t.checked_add(horizon)?)?;
                let bench_start = *bench.get(&start.date)?;
                let bench_end = *bench.get(&end.date)?;
                if start.close <= 0.0 || bench_start <= 0.0 {
                    return None;
                }
                let asset = end.close / start.close - 1.0;
                let market = bench_end / bench_start - 1.0;
                Some(direction.sign() * (asset - market))
            })
            .collect()
    }

    /// Evidence for one horizon. Never fails: too few events is reported as
    /// an insufficient record with every statistic absent.
    pub fn analyze_horizon(
        &self,
        bars: &[Bar],
        benchmark: &[Bar],
        events: &[usize],
        horizon: usize,
        direction: Direction,
    ) -> EvidenceRecord {
        let returns = Self::abnormal_returns(bars, benchmark, events, horizon, direction);
        let n_events = returns.len();

        if n_events < self.config.min_events {
            debug!(horizon, n_events, min = self.config.min_events, "Insufficient events");
            return EvidenceRecord::insufficient(horizon, n_events);
        }

        let mut rng = StdRng::seed_from_u64(self.horizon_seed(horizon));
        let ci = bootstrap_mean_ci(
            &returns,
            self.config.bootstrap_resamples,
            self.config.confidence,
            &mut rng,
        );
        let test = t_test(&returns);

        let car_mean = mean(&returns);
        let p_value = test.map(|t| t.p_value);
        let excludes_zero = ci.is_some_and(|(lo, hi)| lo > 0.0 || hi < 0.0);
        let significant = excludes_zero && p_value.is_some_and(|p| p < self.config.alpha);

        EvidenceRecord {
            horizon,
            car_mean,
            car_median: median(&returns),
            car_ci_low: ci.map(|(lo, _)| lo),
            car_ci_high: ci.map(|(_, hi)| hi),
            n_events,
            p_value,
            significant,
        }
    }

    /// All configured horizons, one after another.
    pub fn analyze(
        &self,
        bars: &[Bar],
        benchmark: &[Bar],
        events: &[usize],
        direction: Direction,
    ) -> Vec<EvidenceRecord> {
        let mut records: Vec<EvidenceRecord> = self
            .config
            .horizons
            .iter()
            .map(|&h| self.analyze_horizon(bars, benchmark, events, h, direction))
            .collect();
        records.sort_by_key(|r| r.horizon);
        records
    }

    /// All configured horizons on the blocking pool, one task per horizon.
    /// Results are returned only once every horizon has finished.
    pub async fn analyze_parallel(
        &self,
        bars: Arc<[Bar]>,
        benchmark: Arc<[Bar]>,
        events: Arc<[usize]>,
        direction: Direction,
    ) -> Result<Vec<EvidenceRecord>> {
        let tasks = self.config.horizons.iter().map(|&horizon| {
            let study = self.clone();
            let (bars, benchmark, events) = (bars.clone(), benchmark.clone(), events.clone());
            tokio::task::spawn_blocking(move || {
                study.analyze_horizon(&bars, &benchmark, &events, horizon, direction)
            })
        });

        let mut records = Vec::with_capacity(self.config.horizons.len());
        for joined in join_all(tasks).await {
            records.push(joined.map_err(|e| Error::Other(format!("evidence task failed: {e}")))?);
        }
        records.sort_by_key(|r| r.horizon);

        info!(
            horizons = records.len(),
            significant = records.iter().filter(|r| r.significant).count(),
            "Event study complete"
        );
        Ok(records)
    }

    /// Per-horizon seed so results do not depend on task scheduling.
    fn horizon_seed(&self, horizon: usize) -> u64 {
        self.config.seed ^ (horizon as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}
