use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use common::{ContextVector, Direction, PolicyResult, PolicyRule, RegimeTrend, TradePlan};

/// User-configurable guardrail limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Equity the account-fraction cap is measured against.
    pub account_equity_usd: f64,
    /// Maximum USD notional for a single plan.
    pub max_ticket_usd: f64,
    /// Maximum share of equity a single plan may commit (e.g. 0.20 = 20%).
    pub max_account_fraction: f64,
    /// Maximum spread as a share of the target move.
    pub max_spread_to_edge: f64,
    pub min_risk_reward: f64,
    pub require_regime_alignment: bool,
    /// Treat blocked economics as a violation instead of an advisory flag.
    pub economics_hard_gate: bool,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            account_equity_usd: 50_000.0,
            max_ticket_usd: 10_000.0,
            max_account_fraction: 0.20,
            max_spread_to_edge: 0.25,
            min_risk_reward: 1.5,
            require_regime_alignment: true,
            economics_hard_gate: true,
        }
    }
}

/// Market state a plan is judged against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyContext {
    pub context: ContextVector,
    pub direction: Direction,
    pub regime: RegimeTrend,
    pub economics_blocked: bool,
}

/// Run every guardrail against a plan.
///
/// Pure and total: all rules are always evaluated, violations are reported in
/// rule order, and identical input always yields an identical result.
pub fn evaluate(plan: &TradePlan, ctx: &PolicyContext, limits: &RiskLimits) -> PolicyResult {
    let mut violations = Vec::new();

    // 1. Position size
    let notional = plan.notional();
    let account_cap = limits.max_account_fraction * limits.account_equity_usd;
    if !notional.is_finite() || notional > limits.max_ticket_usd || notional > account_cap {
        debug!(notional, ticket = limits.max_ticket_usd, account_cap, "Position size violation");
        violations.push(PolicyRule::PositionSize);
    }

    // 2. Spread versus expected edge
    let spread_ok = plan.target_pct > 0.0
        && ctx.context.spread / plan.target_pct <= limits.max_spread_to_edge;
    if !spread_ok {
        debug!(spread = ctx.context.spread, target_pct = plan.target_pct, "Spread-to-edge violation");
        violations.push(PolicyRule::SpreadToEdge);
    }

    // 3. Reward to risk
    let risk = plan.stop_pct.abs();
    let rr_ok = risk > 0.0 && plan.target_pct / risk >= limits.min_risk_reward;
    if !rr_ok {
        debug!(target_pct = plan.target_pct, stop_pct = plan.stop_pct, "Risk/reward violation");
        violations.push(PolicyRule::RiskReward);
    }

    // 4. Regime alignment
    if limits.require_regime_alignment {
        let against_trend = matches!(
            (ctx.direction, ctx.regime),
            (Direction::Long, RegimeTrend::Down) | (Direction::Short, RegimeTrend::Up)
        );
        if against_trend {
            debug!(direction = %ctx.direction, regime = ?ctx.regime, "Regime alignment violation");
            violations.push(PolicyRule::RegimeAlignment);
        }
    }

    // 5. Economics gate
    if limits.economics_hard_gate && ctx.economics_blocked {
        violations.push(PolicyRule::EconomicsBlocked);
    }

    let result = PolicyResult::from_violations(violations);
    if !result.policy_ok {
        let rules: Vec<String> = result.violations.iter().map(|r| r.to_string()).collect();
        warn!(violations = %rules.join(","), "Plan rejected by policy");
    }
    result
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use common::PlanSource;

    fn make_plan(entry: f64, stop_pct: f64, target_pct: f64, size: f64) -> TradePlan {
        TradePlan {
            direction: Direction::Long,
            entry_price: entry,
            stop_price: entry * (1.0 + stop_pct),
            target_price: entry * (1.0 + target_pct),
            stop_pct,
            target_pct,
            risk_reward: target_pct / stop_pct.abs(),
            position_size: size,
            source: PlanSource::Fallback,
            confidence: 0.3,
        }
    }

    fn make_ctx(spread: f64) -> PolicyContext {
        PolicyContext {
            context: ContextVector {
                volatility: 0.02,
                liquidity: 0.6,
                spread,
                catalyst_rank: 0.7,
                sentiment_score: 0.0,
                net_median_return: 0.017,
            },
            direction: Direction::Long,
            regime: RegimeTrend::Up,
            economics_blocked: false,
        }
    }

    #[test]
    fn clean_plan_passes() {
        let result = evaluate(&make_plan(100.0, -0.02, 0.04, 25.0), &make_ctx(0.001), &RiskLimits::default());
        assert!(result.policy_ok);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn oversized_ticket_is_flagged() {
        // 200 * 100 = 20k > 10k ticket cap
        let result = evaluate(&make_plan(100.0, -0.02, 0.04, 200.0), &make_ctx(0.001), &RiskLimits::default());
        assert_eq!(result.violations, vec![PolicyRule::PositionSize]);
    }

    #[test]
    fn account_fraction_caps_below_ticket_limit() {
        let limits = RiskLimits {
            account_equity_usd: 20_000.0,
            ..RiskLimits::default()
        };
        // 5k notional is under the ticket cap but above 20% of 20k
        let result = evaluate(&make_plan(100.0, -0.02, 0.04, 50.0), &make_ctx(0.001), &limits);
        assert_eq!(result.violations, vec![PolicyRule::PositionSize]);
    }

    #[test]
    fn wide_spread_eats_the_edge() {
        // 0.2% spread against a 0.4% target = 50% of the edge
        let result = evaluate(&make_plan(100.0, -0.002, 0.004, 10.0), &make_ctx(0.002), &RiskLimits::default());
        assert!(result.violations.contains(&PolicyRule::SpreadToEdge));
    }

    #[test]
    fn poor_risk_reward_is_flagged() {
        let result = evaluate(&make_plan(100.0, -0.03, 0.03, 10.0), &make_ctx(0.001), &RiskLimits::default());
        assert_eq!(result.violations, vec![PolicyRule::RiskReward]);
    }

    #[test]
    fn long_against_down_regime_is_flagged_unless_disabled() {
        let mut ctx = make_ctx(0.001);
        ctx.regime = RegimeTrend::Down;
        let plan = make_plan(100.0, -0.02, 0.04, 10.0);
        assert_eq!(
            evaluate(&plan, &ctx, &RiskLimits::default()).violations,
            vec![PolicyRule::RegimeAlignment]
        );

        let relaxed = RiskLimits {
            require_regime_alignment: false,
            ..RiskLimits::default()
        };
        assert!(evaluate(&plan, &ctx, &relaxed).policy_ok);
    }

    #[test]
    fn flat_regime_never_violates_alignment() {
        let mut ctx = make_ctx(0.001);
        ctx.regime = RegimeTrend::Flat;
        ctx.direction = Direction::Short;
        assert!(evaluate(&make_plan(100.0, -0.02, 0.04, 10.0), &ctx, &RiskLimits::default()).policy_ok);
    }

    #[test]
    fn blocked_economics_respects_the_gate_toggle() {
        let mut ctx = make_ctx(0.001);
        ctx.economics_blocked = true;
        let plan = make_plan(100.0, -0.02, 0.04, 10.0);
        assert_eq!(
            evaluate(&plan, &ctx, &RiskLimits::default()).violations,
            vec![PolicyRule::EconomicsBlocked]
        );
        let advisory = RiskLimits {
            economics_hard_gate: false,
            ..RiskLimits::default()
        };
        assert!(evaluate(&plan, &ctx, &advisory).policy_ok);
    }

    #[test]
    fn every_rule_reports_in_fixed_order() {
        let mut ctx = make_ctx(0.01);
        ctx.regime = RegimeTrend::Down;
        ctx.economics_blocked = true;
        let result = evaluate(&make_plan(100.0, -0.02, 0.01, 500.0), &ctx, &RiskLimits::default());
        assert_eq!(
            result.violations,
            vec![
                PolicyRule::PositionSize,
                PolicyRule::SpreadToEdge,
                PolicyRule::RiskReward,
                PolicyRule::RegimeAlignment,
                PolicyRule::EconomicsBlocked,
            ]
        );
        assert!(!result.policy_ok);
    }
}
