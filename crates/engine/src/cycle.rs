use std::sync::Arc;

use chrono::NaiveDate;
use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use common::{
    Bar, CancelSignal, ContextVector, DecisionRecord, DecisionState, Error, MarketDataSource,
    Quote, Result, SentimentSource, TextGenerator,
};
use evidence::{assess, EventStudy};
use paper::{ExecutionSimulator, RewardLoop, Settlement};
use planner::{PlanGenerator, PlanRequest};
use risk::PolicyContext;
use selector::BanditStore;
use strategy::indicators::atr;
use strategy::{regime_trend, CatalystDetector};

use crate::config::DeskConfig;

/// Dollar volume is log-scaled and divided by this to land roughly in [0, 1].
const LIQUIDITY_SCALE: f64 = 25.0;

/// Result of one pass over a ticker.
#[derive(Debug, Clone)]
pub enum CycleReport {
    /// No pattern fired on the latest bar.
    NoCatalyst { ticker: String, as_of: NaiveDate },
    Decided(Box<DecisionRecord>),
}

impl CycleReport {
    pub fn record(&self) -> Option<&DecisionRecord> {
        match self {
            CycleReport::Decided(record) => Some(record),
            CycleReport::NoCatalyst { .. } => None,
        }
    }

    pub fn into_record(self) -> Option<DecisionRecord> {
        match self {
            CycleReport::Decided(record) => Some(*record),
            CycleReport::NoCatalyst { .. } => None,
        }
    }
}

/// A historical decision together with its paper settlement.
#[derive(Debug, Clone)]
pub struct ReplayReport {
    pub report: CycleReport,
    /// `None` when nothing was decided or the plan was rejected.
    pub settlement: Option<Settlement>,
}

/// Detect, measure, select, plan and validate for one ticker at a time.
///
/// Cheap to clone: collaborators and the bandit store are shared, so clones
/// handed to concurrent tasks all learn into the same arms.
#[derive(Clone)]
pub struct DecisionCycle {
    config: Arc<DeskConfig>,
    market: Arc<dyn MarketDataSource>,
    sentiment: Option<Arc<dyn SentimentSource>>,
    detector: Arc<CatalystDetector>,
    study: EventStudy,
    planner: PlanGenerator,
    rewards: RewardLoop,
    benchmark_ticker: String,
}

impl DecisionCycle {
    pub fn new(
        config: DeskConfig,
        market: Arc<dyn MarketDataSource>,
        benchmark_ticker: impl Into<String>,
        store: BanditStore,
    ) -> Result<Self> {
        config.validate()?;
        let detector = CatalystDetector::from_config(&config.patterns)?;
        let study = EventStudy::new(config.evidence.clone());
        let planner = PlanGenerator::new(None, config.planner.clone());
        let rewards = RewardLoop::new(ExecutionSimulator::from_costs(&config.costs), store);

        Ok(Self {
            config: Arc::new(config),
            market,
            sentiment: None,
            detector: Arc::new(detector),
            study,
            planner,
            rewards,
            benchmark_ticker: benchmark_ticker.into(),
        })
    }

    /// Ask `generator` for plans before falling back to the ATR rule.
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.planner = PlanGenerator::new(Some(generator), self.config.planner.clone());
        self
    }

    pub fn with_sentiment(mut self, sentiment: Arc<dyn SentimentSource>) -> Self {
        self.sentiment = Some(sentiment);
        self
    }

    pub fn config(&self) -> &DeskConfig {
        &self.config
    }

    pub fn store(&self) -> &BanditStore {
        self.rewards.store()
    }

    /// Live cycle: fetch everything for `ticker`, then decide on the latest bar.
    ///
    /// Market data that stays unavailable after retries fails the ticker with
    /// `DataUnavailable`. A failing sentiment source only zeroes the feature.
    pub async fn decide(&self, ticker: &str, cancel: &CancelSignal) -> Result<CycleReport> {
        let lookback = self.config.cycle.lookback_days;
        let bars = self.history(ticker, lookback).await?;
        let benchmark = self.history(&self.benchmark_ticker, lookback).await?;

        let retry = &self.config.cycle.market_retry;
        let quote = retry
            .run("fetch_quote", || self.market.fetch_quote(ticker))
            .await
            .map_err(|e| unavailable(ticker, e))?;
        let sentiment = self.sentiment_score(ticker).await;

        self.evaluate(ticker, &bars, &benchmark, Some(quote), sentiment, cancel)
            .await
    }

    /// Decide on `bars` as they stand, oldest first, ending at the decision bar.
    ///
    /// Without a quote the last close is the price and costs use the spread proxy.
    pub async fn evaluate(
        &self,
        ticker: &str,
        bars: &[Bar],
        benchmark: &[Bar],
        quote: Option<Quote>,
        sentiment_score: f64,
        cancel: &CancelSignal,
    ) -> Result<CycleReport> {
        let Some(signal) = self.detector.detect(ticker, bars)? else {
            let as_of = bars.last().map_or(NaiveDate::MIN, |b| b.date);
            debug!(ticker, %as_of, "No catalyst");
            return Ok(CycleReport::NoCatalyst {
                ticker: ticker.to_string(),
                as_of,
            });
        };
        let Some(last) = bars.last() else {
            return Err(Error::InsufficientHistory {
                required: 1,
                available: 0,
            });
        };
        info!(
            ticker,
            pattern = %signal.pattern_type,
            direction = %signal.direction,
            rank = signal.rank,
            "Catalyst detected"
        );

        // Evidence from earlier occurrences of the same pattern.
        let events = self
            .detector
            .occurrences(bars, signal.pattern_type, signal.direction);
        let evidence = self
            .study
            .analyze_parallel(
                Arc::from(bars),
                Arc::from(benchmark),
                Arc::from(events),
                signal.direction,
            )
            .await?;

        let live_spread = quote
            .and_then(|q| q.spread)
            .filter(|s| s.is_finite() && *s >= 0.0);
        let economics = assess(
            &evidence,
            self.config.evidence.primary_horizon,
            &self.config.costs,
            live_spread,
        );

        let price = quote
            .map(|q| q.price)
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(last.close);
        let atr = atr(bars, self.config.cycle.atr_period).unwrap_or(0.0);

        let context = ContextVector {
            volatility: if price > 0.0 { atr / price } else { 0.0 },
            liquidity: liquidity(bars, self.config.cycle.liquidity_window),
            spread: live_spread.unwrap_or(self.config.costs.spread_bps / 10_000.0),
            catalyst_rank: signal.rank,
            sentiment_score: sentiment_score.clamp(-1.0, 1.0),
            net_median_return: economics.net_median_return.unwrap_or(0.0),
        };

        let arm = self.store().select(&context).await;

        let request = PlanRequest {
            ticker: ticker.to_string(),
            signal: signal.clone(),
            arm: arm.clone(),
            evidence: evidence.clone(),
            economics: economics.clone(),
            price,
            atr,
        };
        let (plan, plan_note) = self.planner.generate(&request, cancel).await.into_parts();

        let policy_ctx = PolicyContext {
            context,
            direction: signal.direction,
            regime: regime_trend(bars, self.config.cycle.regime_window),
            economics_blocked: economics.blocked,
        };
        let policy = risk::evaluate(&plan, &policy_ctx, &self.config.limits);

        let mut record = DecisionRecord::new(
            ticker, signal, context, arm, evidence, economics, plan, plan_note,
        );
        record.apply_policy(policy)?;

        info!(
            decision_id = %record.decision_id,
            ticker,
            arm = %record.chosen_arm.id,
            source = %record.plan.source,
            blocked = record.economics.blocked,
            regime = ?policy_ctx.regime,
            state = %record.state(),
            "Decision made"
        );
        Ok(CycleReport::Decided(Box::new(record)))
    }

    /// Backtest one bar: decide on `bars[..=as_of]` with the benchmark cut at
    /// the same date, then paper-trade the plan over the bars after it.
    pub async fn replay(
        &self,
        ticker: &str,
        bars: &[Bar],
        benchmark: &[Bar],
        as_of: usize,
        cancel: &CancelSignal,
    ) -> Result<ReplayReport> {
        if as_of >= bars.len() {
            return Err(Error::InsufficientHistory {
                required: as_of + 1,
                available: bars.len(),
            });
        }
        let history = &bars[..=as_of];
        let cutoff = bars[as_of].date;
        let bench: Vec<Bar> = benchmark
            .iter()
            .filter(|b| b.date <= cutoff)
            .copied()
            .collect();

        let report = self
            .evaluate(ticker, history, &bench, None, 0.0, cancel)
            .await?;

        let report = match report {
            CycleReport::Decided(mut record) if record.state() == DecisionState::Validated => {
                let settlement = self.settle(&mut record, &bars[as_of + 1..]).await?;
                return Ok(ReplayReport {
                    report: CycleReport::Decided(record),
                    settlement: Some(settlement),
                });
            }
            other => other,
        };
        Ok(ReplayReport {
            report,
            settlement: None,
        })
    }

    /// Paper-trade a validated record and feed the result back to its arm.
    pub async fn settle(&self, record: &mut DecisionRecord, forward: &[Bar]) -> Result<Settlement> {
        self.rewards.settle(record, forward).await
    }

    /// Live settlement: fetch the bars printed since the decision bar and
    /// settle against them.
    ///
    /// The fetch uses the market retry policy and gives up with
    /// `DataUnavailable` once `cancel` fires, leaving the record untouched.
    pub async fn settle_pending(
        &self,
        record: &mut DecisionRecord,
        cancel: &CancelSignal,
    ) -> Result<Settlement> {
        let ticker = record.ticker.clone();
        let lookback = self.config.cycle.lookback_days;
        let bars = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::DataUnavailable {
                    ticker,
                    reason: "cancelled before settlement bars arrived".into(),
                });
            }
            bars = self.history(&ticker, lookback) => bars?,
        };
        let forward: Vec<Bar> = bars
            .into_iter()
            .filter(|b| b.date > record.signal.detected_at)
            .collect();
        debug!(decision_id = %record.decision_id, bars = forward.len(), "Settling against forward bars");
        self.settle(record, &forward).await
    }

    /// One task per ticker, all sharing this cycle's bandit store.
    ///
    /// Tickers that fail are logged and left out of the result.
    pub async fn run_many(
        &self,
        tickers: &[String],
        cancel: &CancelSignal,
    ) -> Vec<(String, CycleReport)> {
        let tasks = tickers.iter().map(|ticker| {
            let cycle = self.clone();
            let cancel = cancel.clone();
            let ticker = ticker.clone();
            tokio::spawn(async move {
                let result = cycle.decide(&ticker, &cancel).await;
                (ticker, result)
            })
        });

        let mut reports = Vec::with_capacity(tickers.len());
        for joined in join_all(tasks).await {
            match joined {
                Ok((ticker, Ok(report))) => reports.push((ticker, report)),
                Ok((ticker, Err(e))) => warn!(%ticker, error = %e, "Ticker skipped this cycle"),
                Err(e) => error!(error = %e, "Decision task panicked"),
            }
        }
        reports
    }

    async fn history(&self, ticker: &str, lookback: u32) -> Result<Vec<Bar>> {
        let retry = &self.config.cycle.market_retry;
        let bars = retry
            .run("fetch_history", || self.market.fetch_history(ticker, lookback))
            .await
            .map_err(|e| unavailable(ticker, e))?;
        if bars.is_empty() {
            return Err(Error::DataUnavailable {
                ticker: ticker.to_string(),
                reason: "no bars returned".into(),
            });
        }
        Ok(bars)
    }

    /// Mean headline score, or neutral when there is no source or it fails.
    async fn sentiment_score(&self, ticker: &str) -> f64 {
        let Some(source) = &self.sentiment else {
            return 0.0;
        };
        let retry = &self.config.cycle.market_retry;
        match retry.run("fetch_sentiment", || source.fetch(ticker)).await {
            Ok(items) => {
                let scores: Vec<f64> = items
                    .iter()
                    .map(|n| n.score)
                    .filter(|s| s.is_finite())
                    .collect();
                if scores.is_empty() {
                    0.0
                } else {
                    (scores.iter().sum::<f64>() / scores.len() as f64).clamp(-1.0, 1.0)
                }
            }
            Err(e) => {
                warn!(ticker, error = %e, "Sentiment unavailable, using neutral");
                0.0
            }
        }
    }
}

fn unavailable(ticker: &str, e: Error) -> Error {
    match e {
        Error::DataUnavailable { .. } => e,
        other => Error::DataUnavailable {
            ticker: ticker.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Log-scaled average dollar volume over the last `window` bars.
fn liquidity(bars: &[Bar], window: usize) -> f64 {
    let n = window.max(1).min(bars.len());
    if n == 0 {
        return 0.0;
    }
    let dollar_volume = bars[bars.len() - n..]
        .iter()
        .map(|b| b.close * b.volume)
        .sum::<f64>()
        / n as f64;
    if dollar_volume.is_finite() && dollar_volume > 0.0 {
        (dollar_volume.ln_1p() / LIQUIDITY_SCALE).min(1.0)
    } else {
        0.0
    }
}
