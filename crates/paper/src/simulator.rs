use chrono::NaiveDate;
use tracing::debug;

use common::{Bar, Direction, ExitReason, Outcome, TradePlan};
use evidence::CostModel;

/// Where and why a simulated trade left the market.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedExit {
    pub exit_price: f64,
    pub exit_date: NaiveDate,
    pub bars_held: usize,
    pub exit_reason: ExitReason,
}

/// Walks forward bars against a plan's stop and target.
///
/// Fills assume entry at the plan's entry price on the decision bar's close.
/// On every bar the stop is checked before the target, so a bar touching
/// both exits at the stop. A bar that opens beyond a level fills at the open.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionSimulator {
    /// Round-trip cost charged against every realized return.
    round_trip_cost: f64,
}

impl ExecutionSimulator {
    pub fn new(round_trip_cost: f64) -> Self {
        Self {
            round_trip_cost: round_trip_cost.max(0.0),
        }
    }

    /// Charge the cost model's round trip at the spread proxy.
    pub fn from_costs(costs: &CostModel) -> Self {
        Self::new(costs.round_trip(None))
    }

    pub fn round_trip_cost(&self) -> f64 {
        self.round_trip_cost
    }

    /// First exit within `max_holding_bars` of `forward`.
    ///
    /// `None` when the window ends before either level or the holding limit
    /// is reached; the trade is still open.
    pub fn run(
        &self,
        plan: &TradePlan,
        max_holding_bars: usize,
        forward: &[Bar],
    ) -> Option<SimulatedExit> {
        let limit = max_holding_bars.max(1);
        for (i, bar) in forward.iter().take(limit).enumerate() {
            let bars_held = i + 1;
            if let Some((exit_price, exit_reason)) = check_levels(plan, bar) {
                debug!(date = %bar.date, bars_held, reason = %exit_reason, exit_price, "Simulated exit");
                return Some(SimulatedExit {
                    exit_price,
                    exit_date: bar.date,
                    bars_held,
                    exit_reason,
                });
            }
            if bars_held == limit {
                debug!(date = %bar.date, bars_held, "Holding limit reached");
                return Some(SimulatedExit {
                    exit_price: bar.close,
                    exit_date: bar.date,
                    bars_held,
                    exit_reason: ExitReason::Timeout,
                });
            }
        }
        None
    }

    /// Price a simulated exit into an outcome.
    ///
    /// The reward is the R-multiple (net return over the planned risk),
    /// clipped to [-1, 1].
    pub fn outcome(&self, plan: &TradePlan, exit: &SimulatedExit) -> Outcome {
        let gross = if plan.entry_price > 0.0 {
            plan.direction.sign() * (exit.exit_price / plan.entry_price - 1.0)
        } else {
            0.0
        };
        let realized_return = gross - self.round_trip_cost;
        let risk = plan.stop_pct.abs();
        let reward = if risk > 0.0 {
            realized_return / risk
        } else {
            realized_return
        };

        Outcome {
            exit_price: exit.exit_price,
            exit_date: exit.exit_date,
            bars_held: exit.bars_held,
            realized_return,
            realized_pnl: realized_return * plan.notional(),
            exit_reason: exit.exit_reason,
            reward: if reward.is_finite() { reward.clamp(-1.0, 1.0) } else { 0.0 },
        }
    }
}

fn check_levels(plan: &TradePlan, bar: &Bar) -> Option<(f64, ExitReason)> {
    match plan.direction {
        Direction::Long => {
            if bar.low <= plan.stop_price {
                Some((bar.open.min(plan.stop_price), ExitReason::Stop))
            } else if bar.high >= plan.target_price {
                Some((bar.open.max(plan.target_price), ExitReason::Target))
            } else {
                None
            }
        }
        Direction::Short => {
            if bar.high >= plan.stop_price {
                Some((bar.open.max(plan.stop_price), ExitReason::Stop))
            } else if bar.low <= plan.target_price {
                Some((bar.open.min(plan.target_price), ExitReason::Target))
            } else {
                None
            }
        }
    }
}
