//! Strict parsing and validation of generated plans.

use serde::Deserialize;

use common::{Direction, PlanSource, TradePlan};

use crate::fallback::position_size;

/// Tolerance between stated and implied percentages.
const PCT_TOLERANCE: f64 = 1e-3;
/// Relative tolerance between stated and implied reward/risk.
const RR_TOLERANCE: f64 = 0.05;

/// Shape the generator must answer with. Anything else is rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratedPlan {
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub stop_pct: f64,
    pub target_pct: f64,
    pub risk_reward: f64,
    pub confidence: f64,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Bounds a generated plan is checked against.
#[derive(Debug, Clone, Copy)]
pub struct PlanBounds {
    pub direction: Direction,
    pub price: f64,
    pub max_entry_drift: f64,
    pub confidence_floor: f64,
    pub confidence_cap: f64,
    pub risk_usd: f64,
}

/// The JSON object between the first `{` and the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse and validate raw generator output into a plan.
pub fn parse_plan(text: &str, bounds: &PlanBounds) -> Result<TradePlan, String> {
    let json = extract_json(text).ok_or_else(|| "no JSON object in response".to_string())?;
    let raw: GeneratedPlan =
        serde_json::from_str(json).map_err(|e| format!("schema mismatch: {e}"))?;
    validate(raw, bounds)
}

pub fn validate(raw: GeneratedPlan, bounds: &PlanBounds) -> Result<TradePlan, String> {
    if raw.direction != bounds.direction {
        return Err(format!(
            "direction {} contradicts signal {}",
            raw.direction, bounds.direction
        ));
    }

    let prices = [raw.entry_price, raw.stop_price, raw.target_price];
    if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err("prices must be finite and positive".into());
    }
    let (entry, stop, target) = (raw.entry_price, raw.stop_price, raw.target_price);
    let ordered = match raw.direction {
        Direction::Long => stop < entry && entry < target,
        Direction::Short => target < entry && entry < stop,
    };
    if !ordered {
        return Err(format!(
            "levels out of order for {}: stop {stop}, entry {entry}, target {target}",
            raw.direction
        ));
    }

    let sign = raw.direction.sign();
    let stop_pct = sign * (stop / entry - 1.0);
    let target_pct = sign * (target / entry - 1.0);
    if (raw.stop_pct - stop_pct).abs() > PCT_TOLERANCE
        || (raw.target_pct - target_pct).abs() > PCT_TOLERANCE
    {
        return Err(format!(
            "percentages disagree with prices: stated {}/{}, implied {stop_pct:.5}/{target_pct:.5}",
            raw.stop_pct, raw.target_pct
        ));
    }

    let risk_reward = target_pct / -stop_pct;
    if !raw.risk_reward.is_finite() || (raw.risk_reward - risk_reward).abs() > RR_TOLERANCE * risk_reward {
        return Err(format!(
            "risk_reward {} disagrees with implied {risk_reward:.3}",
            raw.risk_reward
        ));
    }

    let drift = (entry / bounds.price - 1.0).abs();
    if drift > bounds.max_entry_drift {
        return Err(format!(
            "entry {entry} drifts {:.2}% from price {}",
            drift * 100.0,
            bounds.price
        ));
    }

    if !(0.0..=1.0).contains(&raw.confidence) {
        return Err(format!("confidence {} outside [0, 1]", raw.confidence));
    }

    Ok(TradePlan {
        direction: raw.direction,
        entry_price: entry,
        stop_price: stop,
        target_price: target,
        stop_pct,
        target_pct,
        risk_reward,
        position_size: position_size(entry, stop, bounds.risk_usd),
        source: PlanSource::Llm,
        confidence: raw.confidence.clamp(bounds.confidence_floor, bounds.confidence_cap),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> PlanBounds {
        PlanBounds {
            direction: Direction::Long,
            price: 100.0,
            max_entry_drift: 0.05,
            confidence_floor: 0.5,
            confidence_cap: 0.95,
            risk_usd: 50.0,
        }
    }

    fn body(entry: f64, stop: f64, target: f64, confidence: f64) -> String {
        let stop_pct = stop / entry - 1.0;
        let target_pct = target / entry - 1.0;
        format!(
            r#"{{"direction":"long","entry_price":{entry},"stop_price":{stop},"target_price":{target},"stop_pct":{stop_pct},"target_pct":{target_pct},"risk_reward":{},"confidence":{confidence}}}"#,
            target_pct / -stop_pct
        )
    }

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let text = "Here is the plan:\n```json\n{\"a\":{\"b\":1}}\n```\nGood luck.";
        assert_eq!(extract_json(text), Some("{\"a\":{\"b\":1}}"));
        assert_eq!(extract_json("no braces"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn valid_plan_is_accepted_and_confidence_clamped() {
        let plan = parse_plan(&body(100.5, 98.0, 105.0, 0.99), &bounds()).unwrap();
        assert_eq!(plan.source, PlanSource::Llm);
        assert_eq!(plan.confidence, 0.95);
        assert!((plan.position_size - 50.0 / 2.5).abs() < 1e-9);

        let low = parse_plan(&body(100.5, 98.0, 105.0, 0.1), &bounds()).unwrap();
        assert_eq!(low.confidence, 0.5);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let text = body(100.5, 98.0, 105.0, 0.8).replace('}', r#","leverage":10}"#);
        let err = parse_plan(&text, &bounds()).unwrap_err();
        assert!(err.contains("schema"), "{err}");
    }

    #[test]
    fn inverted_levels_are_rejected() {
        assert!(parse_plan(&body(100.0, 105.0, 98.0, 0.8), &bounds()).is_err());
    }

    #[test]
    fn inconsistent_percentages_are_rejected() {
        let text = r#"{"direction":"long","entry_price":100,"stop_price":98,"target_price":104,
            "stop_pct":-0.05,"target_pct":0.04,"risk_reward":2.0,"confidence":0.7}"#;
        let err = parse_plan(text, &bounds()).unwrap_err();
        assert!(err.contains("percentages"), "{err}");
    }

    #[test]
    fn far_entry_is_rejected() {
        let err = parse_plan(&body(110.0, 107.0, 118.0, 0.7), &bounds()).unwrap_err();
        assert!(err.contains("drifts"), "{err}");
    }

    #[test]
    fn wrong_direction_is_rejected() {
        let short = PlanBounds {
            direction: Direction::Short,
            ..bounds()
        };
        assert!(parse_plan(&body(100.5, 98.0, 105.0, 0.8), &short).is_err());
    }
}
