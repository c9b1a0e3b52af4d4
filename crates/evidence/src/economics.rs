use serde::{Deserialize, Serialize};
use tracing::debug;

use common::{EconomicsResult, EvidenceRecord};

/// Round-trip trading cost model, in basis points of notional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Spread proxy paid once per round trip when no live spread is known.
    pub spread_bps: f64,
    /// Slippage per side.
    pub slippage_bps: f64,
    /// Commission per side.
    pub fee_bps: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            spread_bps: 10.0,
            slippage_bps: 5.0,
            fee_bps: 5.0,
        }
    }
}

impl CostModel {
    /// Round-trip cost as a fraction of notional. A live spread (already a
    /// fraction of price) replaces the spread proxy.
    pub fn round_trip(&self, live_spread: Option<f64>) -> f64 {
        let spread = live_spread
            .filter(|s| s.is_finite() && *s >= 0.0)
            .unwrap_or(self.spread_bps / 10_000.0);
        spread + 2.0 * (self.slippage_bps + self.fee_bps) / 10_000.0
    }
}

/// Net the primary-horizon median CAR against costs.
///
/// The result is blocked whenever the net return is absent or not positive.
pub fn assess(
    evidence: &[EvidenceRecord],
    primary_horizon: usize,
    costs: &CostModel,
    live_spread: Option<f64>,
) -> EconomicsResult {
    let gross = evidence
        .iter()
        .find(|r| r.horizon == primary_horizon)
        .and_then(|r| r.car_median);
    let cost_estimate = costs.round_trip(live_spread);
    let net = gross.map(|g| g - cost_estimate);
    let blocked = !net.is_some_and(|n| n > 0.0);

    debug!(
        horizon = primary_horizon,
        ?gross,
        cost = cost_estimate,
        ?net,
        blocked,
        "Economics assessed"
    );

    EconomicsResult {
        horizon: primary_horizon,
        gross_median_return: gross,
        cost_estimate,
        net_median_return: net,
        blocked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(horizon: usize, median: Option<f64>) -> EvidenceRecord {
        EvidenceRecord {
            car_median: median,
            car_mean: median,
            n_events: 12,
            ..EvidenceRecord::insufficient(horizon, 12)
        }
    }

    #[test]
    fn default_round_trip_is_thirty_bps() {
        assert!((CostModel::default().round_trip(None) - 0.003).abs() < 1e-12);
    }

    #[test]
    fn live_spread_replaces_the_proxy() {
        let cost = CostModel::default().round_trip(Some(0.002));
        assert!((cost - 0.004).abs() < 1e-12);
    }

    #[test]
    fn positive_net_is_not_blocked() {
        let evidence = [record(1, Some(0.001)), record(5, Some(0.02))];
        let result = assess(&evidence, 5, &CostModel::default(), None);
        assert_eq!(result.gross_median_return, Some(0.02));
        assert!((result.net_median_return.unwrap() - 0.017).abs() < 1e-12);
        assert!(!result.blocked);
    }

    #[test]
    fn cost_eating_the_edge_blocks() {
        let evidence = [record(5, Some(0.002))];
        assert!(assess(&evidence, 5, &CostModel::default(), None).blocked);
    }

    #[test]
    fn missing_evidence_blocks_with_null_returns() {
        let evidence = [EvidenceRecord::insufficient(5, 3)];
        let result = assess(&evidence, 5, &CostModel::default(), None);
        assert_eq!(result.gross_median_return, None);
        assert_eq!(result.net_median_return, None);
        assert!(result.blocked);

        let none = assess(&[], 5, &CostModel::default(), None);
        assert!(none.blocked);
    }
}
