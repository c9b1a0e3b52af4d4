use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// One daily OHLCV bar. Sequences are ordered oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest quote for a ticker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    /// Bid/ask spread as a fraction of price. `None` when the source has no book.
    pub spread: Option<f64>,
}

/// A scored headline from the news/sentiment collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub text: String,
    /// Sentiment score in [-1, 1].
    pub score: f64,
}

/// Side the strategy wants to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1.0 for long, -1.0 for short.
    pub fn sign(self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Tradeable patterns the catalyst detector knows how to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    VolumeBreakout,
    MacdCross,
    RsiReversal,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternType::VolumeBreakout => write!(f, "volume_breakout"),
            PatternType::MacdCross => write!(f, "macd_cross"),
            PatternType::RsiReversal => write!(f, "rsi_reversal"),
        }
    }
}

/// Output of the catalyst detector for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalystSignal {
    pub ticker: String,
    pub pattern_type: PatternType,
    pub detected_at: NaiveDate,
    /// Strength of the pattern, always in [0, 1].
    pub rank: f64,
    pub direction: Direction,
}

/// Event-study result for one forward horizon.
///
/// When fewer than the minimum number of events were available every
/// statistic is `None` and `significant` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Forward horizon in bars.
    pub horizon: usize,
    pub car_mean: Option<f64>,
    pub car_median: Option<f64>,
    pub car_ci_low: Option<f64>,
    pub car_ci_high: Option<f64>,
    pub n_events: usize,
    pub p_value: Option<f64>,
    pub significant: bool,
}

impl EvidenceRecord {
    pub fn insufficient(horizon: usize, n_events: usize) -> Self {
        Self {
            horizon,
            car_mean: None,
            car_median: None,
            car_ci_low: None,
            car_ci_high: None,
            n_events,
            p_value: None,
            significant: false,
        }
    }
}

/// Cost-adjusted view of the evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicsResult {
    /// Horizon the gross return was taken from.
    pub horizon: usize,
    pub gross_median_return: Option<f64>,
    /// Modeled round-trip cost as a fraction of notional.
    pub cost_estimate: f64,
    pub net_median_return: Option<f64>,
    pub blocked: bool,
}

/// Features the strategy selector conditions on. Order is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContextVector {
    /// ATR as a fraction of price.
    pub volatility: f64,
    /// Log-scaled average dollar volume.
    pub liquidity: f64,
    /// Spread as a fraction of price.
    pub spread: f64,
    pub catalyst_rank: f64,
    /// News sentiment in [-1, 1]; 0.0 when no source is available.
    pub sentiment_score: f64,
    /// Net median return; 0.0 when the economics model had no estimate.
    pub net_median_return: f64,
}

impl ContextVector {
    pub const LEN: usize = 6;

    pub fn as_array(&self) -> [f64; Self::LEN] {
        [
            self.volatility,
            self.liquidity,
            self.spread,
            self.catalyst_rank,
            self.sentiment_score,
            self.net_median_return,
        ]
    }
}

/// A strategy arm: how far to place the stop and target, and how long to hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmSpec {
    pub id: String,
    pub stop_atr_mult: f64,
    pub target_atr_mult: f64,
    pub max_holding_bars: usize,
}

/// Where a trade plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    Llm,
    Fallback,
}

impl std::fmt::Display for PlanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanSource::Llm => write!(f, "llm"),
            PlanSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// Concrete entry/stop/target plan.
///
/// `stop_pct` is the directional return at the stop (always <= 0) and
/// `target_pct` the directional return at the target (always >= 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub stop_pct: f64,
    pub target_pct: f64,
    pub risk_reward: f64,
    /// Units of the underlying.
    pub position_size: f64,
    pub source: PlanSource,
    pub confidence: f64,
}

impl TradePlan {
    pub fn notional(&self) -> f64 {
        self.entry_price * self.position_size
    }
}

/// Broader trend the signal is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegimeTrend {
    Up,
    Down,
    Flat,
}

/// Guardrail rules in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    PositionSize,
    SpreadToEdge,
    RiskReward,
    RegimeAlignment,
    EconomicsBlocked,
}

impl std::fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyRule::PositionSize => write!(f, "position_size"),
            PolicyRule::SpreadToEdge => write!(f, "spread_to_edge"),
            PolicyRule::RiskReward => write!(f, "risk_reward"),
            PolicyRule::RegimeAlignment => write!(f, "regime_alignment"),
            PolicyRule::EconomicsBlocked => write!(f, "economics_blocked"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub policy_ok: bool,
    pub violations: Vec<PolicyRule>,
}

impl PolicyResult {
    pub fn from_violations(violations: Vec<PolicyRule>) -> Self {
        Self {
            policy_ok: violations.is_empty(),
            violations,
        }
    }
}

/// Lifecycle of a decision. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum DecisionState {
    Proposed,
    Validated,
    Rejected,
    Executing,
    Closed,
    Expired,
}

impl DecisionState {
    pub fn can_transition_to(self, next: DecisionState) -> bool {
        use DecisionState::*;
        matches!(
            (self, next),
            (Proposed, Validated)
                | (Proposed, Rejected)
                | (Validated, Executing)
                | (Executing, Closed)
                | (Executing, Expired)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DecisionState::Rejected | DecisionState::Closed | DecisionState::Expired
        )
    }
}

impl std::fmt::Display for DecisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionState::Proposed => write!(f, "PROPOSED"),
            DecisionState::Validated => write!(f, "VALIDATED"),
            DecisionState::Rejected => write!(f, "REJECTED"),
            DecisionState::Executing => write!(f, "EXECUTING"),
            DecisionState::Closed => write!(f, "CLOSED"),
            DecisionState::Expired => write!(f, "EXPIRED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitReason {
    Stop,
    Target,
    Timeout,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Stop => write!(f, "stop"),
            ExitReason::Target => write!(f, "target"),
            ExitReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Realized result of an executed decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub exit_price: f64,
    pub exit_date: NaiveDate,
    pub bars_held: usize,
    /// Directional return net of round-trip cost.
    pub realized_return: f64,
    /// `realized_return` times the plan notional, in account currency.
    pub realized_pnl: f64,
    pub exit_reason: ExitReason,
    /// Bandit reward, clipped to [-1, 1].
    pub reward: f64,
}

/// Summary traffic light for a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Verdict {
    Green,
    Yellow,
    Red,
}

impl Verdict {
    /// GREEN needs significant evidence, unblocked economics and a clean policy
    /// check. A policy failure is always RED. Anything else is YELLOW.
    pub fn derive(significant: bool, blocked: bool, policy_ok: bool) -> Self {
        if !policy_ok {
            Verdict::Red
        } else if significant && !blocked {
            Verdict::Green
        } else {
            Verdict::Yellow
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Green => write!(f, "GREEN"),
            Verdict::Yellow => write!(f, "YELLOW"),
            Verdict::Red => write!(f, "RED"),
        }
    }
}

/// The audit unit for one decision cycle.
///
/// Everything except the lifecycle state, the policy result and the terminal
/// outcome is fixed at construction. The outcome can be attached exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: Uuid,
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub signal: CatalystSignal,
    pub context: ContextVector,
    pub chosen_arm: ArmSpec,
    pub evidence: Vec<EvidenceRecord>,
    pub economics: EconomicsResult,
    pub plan: TradePlan,
    /// Why the plan generator fell back, if it did.
    pub plan_note: Option<String>,
    policy_result: Option<PolicyResult>,
    state: DecisionState,
    outcome: Option<Outcome>,
}

impl DecisionRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ticker: impl Into<String>,
        signal: CatalystSignal,
        context: ContextVector,
        chosen_arm: ArmSpec,
        evidence: Vec<EvidenceRecord>,
        economics: EconomicsResult,
        plan: TradePlan,
        plan_note: Option<String>,
    ) -> Self {
        Self {
            decision_id: Uuid::new_v4(),
            ticker: ticker.into(),
            timestamp: Utc::now(),
            signal,
            context,
            chosen_arm,
            evidence,
            economics,
            plan,
            plan_note,
            policy_result: None,
            state: DecisionState::Proposed,
            outcome: None,
        }
    }

    pub fn state(&self) -> DecisionState {
        self.state
    }

    pub fn policy_result(&self) -> Option<&PolicyResult> {
        self.policy_result.as_ref()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Evidence for one horizon, if it was requested.
    pub fn evidence_at(&self, horizon: usize) -> Option<&EvidenceRecord> {
        self.evidence.iter().find(|e| e.horizon == horizon)
    }

    /// Record the guardrail verdict: VALIDATED when clean, REJECTED otherwise.
    pub fn apply_policy(&mut self, result: PolicyResult) -> Result<()> {
        let next = if result.policy_ok {
            DecisionState::Validated
        } else {
            DecisionState::Rejected
        };
        self.transition(next)?;
        self.policy_result = Some(result);
        Ok(())
    }

    /// VALIDATED -> EXECUTING. Refused unless the policy check passed.
    pub fn begin_execution(&mut self) -> Result<()> {
        let policy_ok = self.policy_result.as_ref().is_some_and(|p| p.policy_ok);
        if !policy_ok {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: DecisionState::Executing,
            });
        }
        self.transition(DecisionState::Executing)
    }

    /// Attach the terminal outcome. A timeout exit ends EXPIRED, stop and
    /// target exits end CLOSED.
    pub fn attach_outcome(&mut self, outcome: Outcome) -> Result<()> {
        if self.outcome.is_some() {
            return Err(Error::OutcomeAlreadyAttached(self.decision_id));
        }
        let next = match outcome.exit_reason {
            ExitReason::Timeout => DecisionState::Expired,
            ExitReason::Stop | ExitReason::Target => DecisionState::Closed,
        };
        self.transition(next)?;
        self.outcome = Some(outcome);
        Ok(())
    }

    fn transition(&mut self, next: DecisionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
