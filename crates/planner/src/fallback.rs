use common::{ArmSpec, Direction, PlanSource, TradePlan};

/// Floor on ATR as a fraction of price, so a dead-flat tape still yields a
/// plan with distinct levels.
const MIN_ATR_FRACTION: f64 = 0.005;

/// Units to buy so that a stop-out loses `risk_usd`.
pub fn position_size(entry: f64, stop: f64, risk_usd: f64) -> f64 {
    let distance = (entry - stop).abs();
    if distance > 0.0 && distance.is_finite() && risk_usd > 0.0 {
        risk_usd / distance
    } else {
        0.0
    }
}

/// Deterministic plan from the arm's ATR multiples.
///
/// Entry is the current price; the stop sits `stop_atr_mult` ATRs against
/// the trade and the target `target_atr_mult` ATRs in favour.
pub fn fallback_plan(
    direction: Direction,
    price: f64,
    atr: f64,
    arm: &ArmSpec,
    risk_usd: f64,
    confidence: f64,
) -> TradePlan {
    let entry = price;
    let atr = if atr.is_finite() {
        atr.max(price * MIN_ATR_FRACTION)
    } else {
        price * MIN_ATR_FRACTION
    };
    let sign = direction.sign();

    let stop = (entry - sign * arm.stop_atr_mult * atr).max(entry * 0.01);
    let target = (entry + sign * arm.target_atr_mult * atr).max(entry * 0.01);

    let stop_pct = (sign * (stop / entry - 1.0)).min(0.0);
    let target_pct = (sign * (target / entry - 1.0)).max(0.0);
    let risk_reward = if stop_pct < 0.0 {
        target_pct / -stop_pct
    } else {
        0.0
    };

    TradePlan {
        direction,
        entry_price: entry,
        stop_price: stop,
        target_price: target,
        stop_pct,
        target_pct,
        risk_reward,
        position_size: position_size(entry, stop, risk_usd),
        source: PlanSource::Fallback,
        confidence,
    }
}
