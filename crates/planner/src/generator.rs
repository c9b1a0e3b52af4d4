use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use common::{
    ArmSpec, CancelSignal, CatalystSignal, EconomicsResult, EvidenceRecord, RetryPolicy,
    TextGenerator, TradePlan,
};

use crate::fallback::fallback_plan;
use crate::schema::{parse_plan, PlanBounds};

/// Plan generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub retry: RetryPolicy,
    /// Confidence stamped on fallback plans. Kept below the accepted floor.
    pub fallback_confidence: f64,
    pub accepted_confidence_floor: f64,
    pub accepted_confidence_cap: f64,
    /// Largest accepted distance between generated entry and current price.
    pub max_entry_drift: f64,
    /// Loss at the stop used to size positions.
    pub risk_per_trade_usd: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            fallback_confidence: 0.3,
            accepted_confidence_floor: 0.5,
            accepted_confidence_cap: 0.95,
            max_entry_drift: 0.05,
            risk_per_trade_usd: 50.0,
        }
    }
}

/// Everything the generator sees about one decision.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub ticker: String,
    pub signal: CatalystSignal,
    pub arm: ArmSpec,
    pub evidence: Vec<EvidenceRecord>,
    pub economics: EconomicsResult,
    /// Latest price; fallback entries are placed here.
    pub price: f64,
    pub atr: f64,
}

/// Result of plan generation. Never an error: a failed or cancelled
/// generation degrades to the ATR fallback with the reason attached.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    Accepted(TradePlan),
    Degraded { plan: TradePlan, reason: String },
}

impl PlanOutcome {
    pub fn plan(&self) -> &TradePlan {
        match self {
            PlanOutcome::Accepted(plan) | PlanOutcome::Degraded { plan, .. } => plan,
        }
    }

    pub fn into_parts(self) -> (TradePlan, Option<String>) {
        match self {
            PlanOutcome::Accepted(plan) => (plan, None),
            PlanOutcome::Degraded { plan, reason } => (plan, Some(reason)),
        }
    }
}

/// Turns a selected arm into a concrete entry/stop/target plan, asking the
/// text generator first and falling back to fixed ATR multiples.
#[derive(Clone)]
pub struct PlanGenerator {
    generator: Option<Arc<dyn TextGenerator>>,
    config: PlannerConfig,
}

impl PlanGenerator {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, config: PlannerConfig) -> Self {
        let fallback_confidence = config
            .fallback_confidence
            .min(config.accepted_confidence_floor - f64::EPSILON)
            .max(0.0);
        Self {
            generator,
            config: PlannerConfig {
                fallback_confidence,
                ..config
            },
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub async fn generate(&self, req: &PlanRequest, cancel: &CancelSignal) -> PlanOutcome {
        let Some(generator) = self.generator.as_ref() else {
            return self.degrade(req, "generator not configured".into());
        };
        if cancel.is_cancelled() {
            return self.degrade(req, "cancelled before generation".into());
        }

        let bounds = PlanBounds {
            direction: req.signal.direction,
            price: req.price,
            max_entry_drift: self.config.max_entry_drift,
            confidence_floor: self.config.accepted_confidence_floor,
            confidence_cap: self.config.accepted_confidence_cap,
            risk_usd: self.config.risk_per_trade_usd,
        };
        let prompt = build_prompt(req, self.config.max_entry_drift);
        let retry = &self.config.retry;
        let attempts = retry.max_attempts.max(1);
        let timeout = retry.per_attempt_timeout();
        let mut last_reason = String::from("no attempts made");

        for attempt in 1..=attempts {
            let call = tokio::time::timeout(timeout, generator.generate(&prompt, timeout));
            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    return self.degrade(req, format!("cancelled during attempt {attempt}"));
                }
                r = call => r,
            };

            match response {
                Ok(Ok(text)) => match parse_plan(&text, &bounds) {
                    Ok(plan) => {
                        info!(
                            ticker = %req.ticker,
                            attempt,
                            entry = plan.entry_price,
                            stop = plan.stop_price,
                            target = plan.target_price,
                            confidence = plan.confidence,
                            "Generated plan accepted"
                        );
                        return PlanOutcome::Accepted(plan);
                    }
                    Err(reason) => {
                        warn!(ticker = %req.ticker, attempt, %reason, "Generated plan rejected");
                        last_reason = format!("invalid plan: {reason}");
                    }
                },
                Ok(Err(e)) if e.is_retryable() => {
                    warn!(ticker = %req.ticker, attempt, error = %e, "Generation attempt failed");
                    last_reason = e.to_string();
                }
                Ok(Err(e)) => {
                    warn!(ticker = %req.ticker, error = %e, "Generation failed permanently");
                    return self.degrade(req, e.to_string());
                }
                Err(_) => {
                    warn!(ticker = %req.ticker, attempt, ?timeout, "Generation attempt timed out");
                    last_reason = format!("timed out after {timeout:?}");
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return self.degrade(req, format!("cancelled after attempt {attempt}"));
                    }
                    _ = tokio::time::sleep(retry.backoff_after(attempt)) => {}
                }
            }
        }

        self.degrade(req, format!("{attempts} attempts exhausted, last: {last_reason}"))
    }

    fn degrade(&self, req: &PlanRequest, reason: String) -> PlanOutcome {
        let plan = fallback_plan(
            req.signal.direction,
            req.price,
            req.atr,
            &req.arm,
            self.config.risk_per_trade_usd,
            self.config.fallback_confidence,
        );
        info!(ticker = %req.ticker, arm = %req.arm.id, %reason, "Using fallback plan");
        PlanOutcome::Degraded { plan, reason }
    }
}

fn build_prompt(req: &PlanRequest, max_entry_drift: f64) -> String {
    let evidence: Vec<_> = req
        .evidence
        .iter()
        .map(|r| {
            json!({
                "horizon": r.horizon,
                "car_mean": r.car_mean,
                "car_median": r.car_median,
                "ci": [r.car_ci_low, r.car_ci_high],
                "n_events": r.n_events,
                "p_value": r.p_value,
                "significant": r.significant,
            })
        })
        .collect();
    let context = json!({
        "ticker": req.ticker,
        "direction": req.signal.direction,
        "pattern": req.signal.pattern_type,
        "rank": req.signal.rank,
        "price": req.price,
        "atr": req.atr,
        "arm": {
            "id": req.arm.id,
            "stop_atr_mult": req.arm.stop_atr_mult,
            "target_atr_mult": req.arm.target_atr_mult,
            "max_holding_bars": req.arm.max_holding_bars,
        },
        "evidence": evidence,
        "economics": {
            "net_median_return": req.economics.net_median_return,
            "cost_estimate": req.economics.cost_estimate,
            "blocked": req.economics.blocked,
        },
    });
    debug!(ticker = %req.ticker, "Built plan prompt");

    format!(
        "You are a trading desk planner. Propose one {direction} trade for {ticker}.\n\
         Market context:\n{context}\n\n\
         Reply with a single JSON object and nothing else, with exactly these fields:\n\
         direction (\"long\" or \"short\"), entry_price, stop_price, target_price,\n\
         stop_pct (directional return at the stop, <= 0), target_pct (directional return at the target, >= 0),\n\
         risk_reward (target_pct / |stop_pct|), confidence (0 to 1), rationale (short string).\n\
         Keep entry within {drift:.1}% of the current price.",
        direction = req.signal.direction,
        ticker = req.ticker,
        drift = max_entry_drift * 100.0,
    )
}
