use common::{ContextVector, Direction, PlanSource, PolicyRule, RegimeTrend, TradePlan};
use proptest::prelude::*;
use risk::{evaluate, PolicyContext, RiskLimits};

fn regime_strategy() -> impl Strategy<Value = RegimeTrend> {
    prop_oneof![
        Just(RegimeTrend::Up),
        Just(RegimeTrend::Down),
        Just(RegimeTrend::Flat)
    ]
}

proptest! {
    /// Guardrail evaluation on randomized plans must never panic, must be
    /// deterministic, and must report ok exactly when nothing was violated.
    #[test]
    fn evaluation_is_deterministic_and_consistent(
        entry in 0.0001f64..1_000_000.0f64,
        stop_pct in -0.5f64..0.0f64,
        target_pct in 0.0f64..0.5f64,
        size in 0.0f64..10_000.0f64,
        spread in 0.0f64..0.05f64,
        long in any::<bool>(),
        regime in regime_strategy(),
        blocked in any::<bool>(),
    ) {
        let direction = if long { Direction::Long } else { Direction::Short };
        let plan = TradePlan {
            direction,
            entry_price: entry,
            stop_price: entry * (1.0 + direction.sign() * stop_pct),
            target_price: entry * (1.0 + direction.sign() * target_pct),
            stop_pct,
            target_pct,
            risk_reward: if stop_pct < 0.0 { target_pct / -stop_pct } else { 0.0 },
            position_size: size,
            source: PlanSource::Fallback,
            confidence: 0.3,
        };
        let ctx = PolicyContext {
            context: ContextVector {
                volatility: 0.02,
                liquidity: 0.5,
                spread,
                catalyst_rank: 0.5,
                sentiment_score: 0.0,
                net_median_return: 0.0,
            },
            direction,
            regime,
            economics_blocked: blocked,
        };
        let limits = RiskLimits::default();

        let first = evaluate(&plan, &ctx, &limits);
        let second = evaluate(&plan, &ctx, &limits);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.policy_ok, first.violations.is_empty());
        prop_assert_eq!(first.violations.contains(&PolicyRule::EconomicsBlocked), blocked);

        // Reported in rule order, no duplicates.
        let order = |r: &PolicyRule| *r as u8;
        prop_assert!(first.violations.windows(2).all(|w| order(&w[0]) < order(&w[1])));
    }
}
