use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::{ArmSpec, ContextVector, Error, Result};

use crate::linucb::{features, ArmSnapshot, ArmState};

/// Bandit tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanditConfig {
    /// Width of the confidence bonus.
    pub alpha: f64,
    /// Probability of a uniformly random arm.
    pub epsilon: f64,
    /// Evidence discount per applied reward, in (0, 1].
    pub decay: f64,
    /// Prior precision of each arm.
    pub ridge: f64,
    /// Settled decision ids remembered for duplicate detection. The oldest
    /// are forgotten first.
    pub applied_capacity: usize,
    pub seed: u64,
}

impl Default for BanditConfig {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            epsilon: 0.05,
            decay: 0.995,
            ridge: 1.0,
            applied_capacity: 100_000,
            seed: 42,
        }
    }
}

struct BanditState {
    arms: Vec<ArmState>,
    /// Decisions whose reward has already been applied.
    applied: HashSet<Uuid>,
    /// Same ids in the order they were applied.
    applied_order: VecDeque<Uuid>,
    rng: StdRng,
}

impl BanditState {
    fn mark_applied(&mut self, decision_id: Uuid, capacity: usize) {
        self.applied.insert(decision_id);
        self.applied_order.push_back(decision_id);
        while self.applied_order.len() > capacity.max(1) {
            if let Some(old) = self.applied_order.pop_front() {
                self.applied.remove(&old);
            }
        }
    }
}

/// Shared, explicitly owned bandit state.
///
/// Clones share the same arms. Every cycle gets a handle; nothing resets it
/// between tickers. Selection and updates hold the lock for their whole
/// duration, so concurrent cycles see a consistent posterior.
#[derive(Clone)]
pub struct BanditStore {
    inner: Arc<Mutex<BanditState>>,
    config: Arc<BanditConfig>,
}

impl BanditStore {
    pub fn new(arms: Vec<ArmSpec>, config: BanditConfig) -> Result<Self> {
        if arms.is_empty() {
            return Err(Error::Config("at least one [[arm]] is required".into()));
        }
        let mut seen = HashSet::new();
        for arm in &arms {
            if !seen.insert(arm.id.as_str()) {
                return Err(Error::Config(format!("duplicate arm id '{}'", arm.id)));
            }
        }

        info!(arms = arms.len(), alpha = config.alpha, epsilon = config.epsilon, "Bandit store ready");
        let state = BanditState {
            arms: arms
                .into_iter()
                .map(|spec| ArmState::new(spec, config.ridge))
                .collect(),
            applied: HashSet::new(),
            applied_order: VecDeque::new(),
            rng: StdRng::seed_from_u64(config.seed),
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(state)),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &BanditConfig {
        &self.config
    }

    /// Choose an arm for this context.
    ///
    /// With probability ε a uniformly random arm; otherwise the highest
    /// upper confidence bound, ties broken by the store's seeded RNG.
    pub async fn select(&self, ctx: &ContextVector) -> ArmSpec {
        let x = features(ctx);
        let mut state = self.inner.lock().await;
        let BanditState { arms, rng, .. } = &mut *state;

        let idx = if rng.gen::<f64>() < self.config.epsilon {
            let i = rng.gen_range(0..arms.len());
            debug!(arm = %arms[i].spec.id, "Exploring at random");
            i
        } else {
            let scores: Vec<f64> = arms.iter().map(|a| a.score(&x, self.config.alpha)).collect();
            let best = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let tied: Vec<usize> = scores
                .iter()
                .enumerate()
                .filter(|(_, s)| (**s - best).abs() <= 1e-12)
                .map(|(i, _)| i)
                .collect();
            match tied.len() {
                0 => 0,
                1 => tied[0],
                n => tied[rng.gen_range(0..n)],
            }
        };

        let arm = &mut arms[idx];
        arm.pulls += 1;
        debug!(arm = %arm.spec.id, pulls = arm.pulls, "Arm selected");
        arm.spec.clone()
    }

    /// Apply the reward for one decision.
    ///
    /// A second reward for the same decision returns `DuplicateReward` and
    /// leaves every arm untouched.
    pub async fn update(
        &self,
        decision_id: Uuid,
        arm_id: &str,
        ctx: &ContextVector,
        reward: f64,
    ) -> Result<ArmSnapshot> {
        let mut state = self.inner.lock().await;
        if state.applied.contains(&decision_id) {
            warn!(%decision_id, arm = arm_id, "Reward already applied, ignoring");
            return Err(Error::DuplicateReward { decision_id });
        }
        let arm = state
            .arms
            .iter_mut()
            .find(|a| a.spec.id == arm_id)
            .ok_or_else(|| Error::UnknownArm(arm_id.to_string()))?;

        let reward = if reward.is_finite() { reward.clamp(-1.0, 1.0) } else { 0.0 };
        arm.update(&features(ctx), reward, self.config.decay);
        let snapshot = arm.snapshot();
        state.mark_applied(decision_id, self.config.applied_capacity);

        info!(
            %decision_id,
            arm = arm_id,
            reward,
            updates = snapshot.updates,
            mean_reward = snapshot.mean_reward,
            "Bandit updated"
        );
        Ok(snapshot)
    }

    pub async fn is_applied(&self, decision_id: Uuid) -> bool {
        self.inner.lock().await.applied.contains(&decision_id)
    }

    pub async fn snapshot(&self) -> Vec<ArmSnapshot> {
        self.inner
            .lock()
            .await
            .arms
            .iter()
            .map(ArmState::snapshot)
            .collect()
    }
}
