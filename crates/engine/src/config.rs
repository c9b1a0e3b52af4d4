use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use common::{ArmSpec, Error, Result, RetryPolicy};
use evidence::{CostModel, EvidenceConfig};
use planner::PlannerConfig;
use risk::RiskLimits;
use selector::BanditConfig;
use strategy::{default_patterns, PatternConfig};

/// Settings of the decision cycle itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Calendar days of history requested per ticker.
    pub lookback_days: u32,
    pub atr_period: usize,
    /// Closes feeding the regime filter.
    pub regime_window: usize,
    /// Bars averaged for the dollar-volume liquidity feature.
    pub liquidity_window: usize,
    /// Retry schedule for market-data and sentiment calls.
    pub market_retry: RetryPolicy,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            lookback_days: 400,
            atr_period: 14,
            regime_window: 50,
            liquidity_window: 20,
            market_retry: RetryPolicy {
                max_attempts: 3,
                per_attempt_timeout_ms: 10_000,
                initial_backoff_ms: 250,
                max_backoff_ms: 4_000,
                multiplier: 2.0,
            },
        }
    }
}

/// Typed desk settings, loaded from a TOML file.
///
/// Every section is optional; missing fields take their defaults.
///
/// ```toml
/// [costs]
/// spread_bps = 8.0
///
/// [[arm]]
/// id = "swing"
/// stop_atr_mult = 1.5
/// target_atr_mult = 3.0
/// max_holding_bars = 10
///
/// [[pattern]]
/// type = "volume_breakout"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeskConfig {
    pub cycle: CycleConfig,
    pub evidence: EvidenceConfig,
    pub costs: CostModel,
    pub limits: RiskLimits,
    pub bandit: BanditConfig,
    pub planner: PlannerConfig,
    #[serde(rename = "arm")]
    pub arms: Vec<ArmSpec>,
    #[serde(rename = "pattern")]
    pub patterns: Vec<PatternConfig>,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            cycle: CycleConfig::default(),
            evidence: EvidenceConfig::default(),
            costs: CostModel::default(),
            limits: RiskLimits::default(),
            bandit: BanditConfig::default(),
            planner: PlannerConfig::default(),
            arms: default_arms(),
            patterns: default_patterns(),
        }
    }
}

/// Arms used when the config file declares none.
pub fn default_arms() -> Vec<ArmSpec> {
    [("momentum_tight", 1.0, 2.0), ("swing", 1.5, 3.0), ("wide", 2.0, 4.0)]
        .into_iter()
        .map(|(id, stop, target)| ArmSpec {
            id: id.to_string(),
            stop_atr_mult: stop,
            target_atr_mult: target,
            max_holding_bars: 10,
        })
        .collect()
}

impl DeskConfig {
    /// Load and validate the desk file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        info!(
            path = %path.display(),
            arms = config.arms.len(),
            patterns = config.patterns.len(),
            "Desk config loaded"
        );
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: DeskConfig =
            toml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        // An empty list in the file means "use the defaults", same as omitting it.
        if config.arms.is_empty() {
            config.arms = default_arms();
        }
        if config.patterns.is_empty() {
            config.patterns = default_patterns();
        }
        config.validate()?;
        Ok(config)
    }

    /// Replace the bandit seed when the process was given one.
    pub fn with_seed_override(mut self, seed: Option<u64>) -> Self {
        if let Some(seed) = seed {
            self.bandit.seed = seed;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        for arm in &self.arms {
            let ok = arm.stop_atr_mult > 0.0
                && arm.target_atr_mult > 0.0
                && arm.max_holding_bars > 0
                && !arm.id.trim().is_empty();
            if !ok {
                return Err(Error::Config(format!(
                    "arm '{}' needs positive multiples and holding bars",
                    arm.id
                )));
            }
        }
        if !self.evidence.horizons.contains(&self.evidence.primary_horizon) {
            return Err(Error::Config(format!(
                "primary_horizon {} is not one of the horizons {:?}",
                self.evidence.primary_horizon, self.evidence.horizons
            )));
        }
        if self.evidence.horizons.iter().any(|&h| h == 0) {
            return Err(Error::Config("horizons must be at least one bar".into()));
        }
        if !(0.0..1.0).contains(&self.evidence.alpha) || self.evidence.alpha == 0.0 {
            return Err(Error::Config(format!(
                "alpha must be in (0, 1), got {}",
                self.evidence.alpha
            )));
        }
        if self.evidence.min_events < 2 {
            return Err(Error::Config(format!(
                "min_events must be at least 2, got {}",
                self.evidence.min_events
            )));
        }
        if self.cycle.atr_period == 0 {
            return Err(Error::Config("atr_period must be positive".into()));
        }
        self.cycle.market_retry.validate("cycle.market_retry")?;
        self.planner.retry.validate("planner.retry")?;
        if !(self.bandit.decay > 0.0 && self.bandit.decay <= 1.0) {
            return Err(Error::Config(format!(
                "bandit decay must be in (0, 1], got {}",
                self.bandit.decay
            )));
        }
        if self.bandit.ridge.is_nan() || self.bandit.ridge <= 0.0 {
            return Err(Error::Config("bandit ridge must be positive".into()));
        }
        Ok(())
    }
}
