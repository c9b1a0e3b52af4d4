use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{
    DecisionRecord, DecisionState, Direction, EconomicsResult, EvidenceRecord, Outcome,
    PatternType, PlanSource, PolicyRule, Verdict,
};

/// The decision as handed to consumers: a flat, stable JSON document.
///
/// Absent statistics stay explicit `null`s rather than being dropped, so a
/// degraded decision has the same shape as a confident one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionContract {
    pub ticker: String,
    pub verdict: Verdict,
    pub evidence: Vec<EvidenceEntry>,
    pub economics: EconomicsResult,
    pub plan: PlanBlock,
    pub metadata: ContractMetadata,
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    pub horizon: usize,
    pub car: Option<f64>,
    pub car_median: Option<f64>,
    /// `[low, high]` of the bootstrap interval.
    pub ci: [Option<f64>; 2],
    pub n_events: usize,
    pub p_value: Option<f64>,
    pub significant: bool,
}

impl From<&EvidenceRecord> for EvidenceEntry {
    fn from(r: &EvidenceRecord) -> Self {
        Self {
            horizon: r.horizon,
            car: r.car_mean,
            car_median: r.car_median,
            ci: [r.car_ci_low, r.car_ci_high],
            n_events: r.n_events,
            p_value: r.p_value,
            significant: r.significant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanBlock {
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub stop_pct: f64,
    pub target_pct: f64,
    pub risk_reward: f64,
    pub position_size: f64,
    pub policy_ok: bool,
    pub violations: Vec<PolicyRule>,
    pub source: PlanSource,
    pub confidence: f64,
    /// Why the fallback was used, when it was.
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractMetadata {
    pub decision_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub detected_at: NaiveDate,
    pub arm: String,
    pub pattern: PatternType,
    pub rank: f64,
    pub state: DecisionState,
}

impl DecisionContract {
    /// Snapshot a record. A record with no policy result yet reads as not ok.
    pub fn from_record(record: &DecisionRecord) -> Self {
        let (policy_ok, violations) = record
            .policy_result()
            .map(|p| (p.policy_ok, p.violations.clone()))
            .unwrap_or((false, Vec::new()));
        let significant = record
            .evidence_at(record.economics.horizon)
            .is_some_and(|e| e.significant);
        let plan = &record.plan;

        Self {
            ticker: record.ticker.clone(),
            verdict: Verdict::derive(significant, record.economics.blocked, policy_ok),
            evidence: record.evidence.iter().map(EvidenceEntry::from).collect(),
            economics: record.economics.clone(),
            plan: PlanBlock {
                direction: plan.direction,
                entry: plan.entry_price,
                stop: plan.stop_price,
                target: plan.target_price,
                stop_pct: plan.stop_pct,
                target_pct: plan.target_pct,
                risk_reward: plan.risk_reward,
                position_size: plan.position_size,
                policy_ok,
                violations,
                source: plan.source,
                confidence: plan.confidence,
                note: record.plan_note.clone(),
            },
            metadata: ContractMetadata {
                decision_id: record.decision_id,
                timestamp: record.timestamp,
                detected_at: record.signal.detected_at,
                arm: record.chosen_arm.id.clone(),
                pattern: record.signal.pattern_type,
                rank: record.signal.rank,
                state: record.state(),
            },
            outcome: record.outcome().cloned(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
