use tracing::{info, warn};

use common::{Bar, DecisionRecord, DecisionState, Error, Outcome, Result};
use selector::{ArmSnapshot, BanditStore};

use crate::simulator::ExecutionSimulator;

/// What happened when a decision was settled against forward bars.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    /// Neither level nor the holding limit was reached; the record stays
    /// EXECUTING and can be settled again with a longer window.
    Open { bars_seen: usize },
    /// The outcome was attached and the selector updated.
    Settled { outcome: Outcome, arm: ArmSnapshot },
}

/// Closes the learning loop: simulate, attach the outcome once, and apply
/// exactly one reward to the arm that made the decision.
#[derive(Clone)]
pub struct RewardLoop {
    simulator: ExecutionSimulator,
    store: BanditStore,
}

impl RewardLoop {
    pub fn new(simulator: ExecutionSimulator, store: BanditStore) -> Self {
        Self { simulator, store }
    }

    pub fn store(&self) -> &BanditStore {
        &self.store
    }

    /// Settle a VALIDATED or EXECUTING record.
    ///
    /// A REJECTED record fails with `InvalidTransition` and never reaches the
    /// simulator. A record that already carries an outcome fails with
    /// `OutcomeAlreadyAttached` and the selector is not touched.
    pub async fn settle(&self, record: &mut DecisionRecord, forward: &[Bar]) -> Result<Settlement> {
        if record.outcome().is_some() {
            return Err(Error::OutcomeAlreadyAttached(record.decision_id));
        }
        if record.state() == DecisionState::Validated {
            record.begin_execution()?;
            info!(decision_id = %record.decision_id, ticker = %record.ticker, "Paper execution started");
        }
        if record.state() != DecisionState::Executing {
            return Err(Error::InvalidTransition {
                from: record.state(),
                to: DecisionState::Executing,
            });
        }

        let max_bars = record.chosen_arm.max_holding_bars;
        let Some(exit) = self.simulator.run(&record.plan, max_bars, forward) else {
            info!(
                decision_id = %record.decision_id,
                bars_seen = forward.len(),
                max_bars,
                "Trade still open"
            );
            return Ok(Settlement::Open {
                bars_seen: forward.len(),
            });
        };

        let outcome = self.simulator.outcome(&record.plan, &exit);
        record.attach_outcome(outcome.clone())?;

        let arm = match self
            .store
            .update(
                record.decision_id,
                &record.chosen_arm.id,
                &record.context,
                outcome.reward,
            )
            .await
        {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(decision_id = %record.decision_id, error = %e, "Reward not applied");
                return Err(e);
            }
        };

        info!(
            decision_id = %record.decision_id,
            ticker = %record.ticker,
            reason = %outcome.exit_reason,
            bars_held = outcome.bars_held,
            realized_return = outcome.realized_return,
            reward = outcome.reward,
            state = %record.state(),
            "Decision settled"
        );
        Ok(Settlement::Settled { outcome, arm })
    }
}
