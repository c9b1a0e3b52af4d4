use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use common::{
    cancel_pair, Bar, CancelSignal, DecisionState, Error, MarketDataSource, NewsItem, PlanSource,
    PolicyRule, Quote, Result, RetryPolicy, SentimentSource, TextGenerator, Verdict,
};
use engine::{CycleReport, DecisionContract, DecisionCycle, DeskConfig};
use paper::{Settlement, SyntheticMarket, SyntheticProfile};
use selector::BanditStore;
use strategy::PatternConfig;

const SEED: u64 = 7;

fn desk() -> DeskConfig {
    let mut config = DeskConfig {
        patterns: vec![PatternConfig::new("volume_breakout")],
        ..DeskConfig::default()
    };
    config.cycle.market_retry = RetryPolicy {
        max_attempts: 2,
        per_attempt_timeout_ms: 1_000,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        multiplier: 2.0,
    };
    config.planner.retry = RetryPolicy {
        max_attempts: 2,
        per_attempt_timeout_ms: 50,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
        multiplier: 2.0,
    };
    config
}

fn market(profile: SyntheticProfile) -> SyntheticMarket {
    SyntheticMarket::new(profile, SEED, "SPY")
}

fn cycle_over(config: DeskConfig, source: Arc<dyn MarketDataSource>) -> DecisionCycle {
    let store = BanditStore::new(config.arms.clone(), config.bandit.clone()).unwrap();
    DecisionCycle::new(config, source, "SPY", store).unwrap()
}

fn anchored(max_prior_events: Option<usize>) -> SyntheticMarket {
    market(SyntheticProfile {
        anchor: Some(250),
        max_prior_events,
        ..SyntheticProfile::default()
    })
}

#[tokio::test]
async fn strong_history_yields_a_green_validated_decision() {
    let m = anchored(None);
    let (bars, bench) = (m.series("ACME"), m.series("SPY"));
    let cycle = cycle_over(desk(), Arc::new(m));

    let replay = cycle
        .replay("ACME", &bars, &bench, 250, &CancelSignal::never())
        .await
        .unwrap();
    let record = replay.report.record().expect("breakout on the decision bar");

    let primary = record.evidence_at(5).unwrap();
    assert_eq!(primary.n_events, 12);
    let car = primary.car_mean.unwrap();
    assert!((car - 0.02).abs() < 0.005, "car_mean {car}");
    assert!(primary.significant);
    assert!(primary.car_ci_low.unwrap() > 0.0);

    assert!((record.economics.cost_estimate - 0.003).abs() < 1e-12);
    assert!(!record.economics.blocked);
    assert!(record.policy_result().unwrap().policy_ok);
    assert_eq!(record.plan.source, PlanSource::Fallback);

    // The paper trade settled and taught the chosen arm exactly once.
    assert!(matches!(replay.settlement, Some(Settlement::Settled { .. })));
    assert!(matches!(
        record.state(),
        DecisionState::Closed | DecisionState::Expired
    ));
    let updates: u64 = cycle.store().snapshot().await.iter().map(|a| a.updates).sum();
    assert_eq!(updates, 1);

    let contract = DecisionContract::from_record(record);
    assert_eq!(contract.verdict, Verdict::Green);
    assert!(contract.outcome.is_some());
}

#[tokio::test]
async fn thin_history_degrades_but_completes() {
    let m = anchored(Some(3));
    let (bars, bench) = (m.series("ACME"), m.series("SPY"));
    let cycle = cycle_over(desk(), Arc::new(m));

    let replay = cycle
        .replay("ACME", &bars, &bench, 250, &CancelSignal::never())
        .await
        .unwrap();
    let record = replay.report.record().expect("breakout on the decision bar");

    for evidence in &record.evidence {
        assert_eq!(evidence.n_events, 3);
        assert!(evidence.car_mean.is_none());
        assert!(evidence.p_value.is_none());
        assert!(!evidence.significant);
    }
    assert!(record.economics.blocked);
    assert_eq!(record.state(), DecisionState::Rejected);
    assert!(record
        .policy_result()
        .unwrap()
        .violations
        .contains(&PolicyRule::EconomicsBlocked));
    assert!(replay.settlement.is_none());
    assert_eq!(DecisionContract::from_record(record).verdict, Verdict::Red);
}

#[tokio::test]
async fn soft_economics_gate_leaves_a_yellow_decision() {
    let m = anchored(Some(3));
    let (bars, bench) = (m.series("ACME"), m.series("SPY"));
    let mut config = desk();
    config.limits.economics_hard_gate = false;
    let cycle = cycle_over(config, Arc::new(m));

    let replay = cycle
        .replay("ACME", &bars, &bench, 250, &CancelSignal::never())
        .await
        .unwrap();
    let record = replay.report.record().unwrap();
    assert!(record.economics.blocked);
    assert!(record.policy_result().unwrap().policy_ok);
    assert_eq!(DecisionContract::from_record(record).verdict, Verdict::Yellow);
}

#[tokio::test]
async fn quiet_bar_reports_no_catalyst() {
    let m = anchored(None);
    let (bars, bench) = (m.series("ACME"), m.series("SPY"));
    let cycle = cycle_over(desk(), Arc::new(m));

    let replay = cycle
        .replay("ACME", &bars, &bench, 240, &CancelSignal::never())
        .await
        .unwrap();
    assert!(matches!(replay.report, CycleReport::NoCatalyst { .. }));
    assert!(replay.settlement.is_none());
    assert_eq!(cycle.store().snapshot().await.iter().map(|a| a.pulls).sum::<u64>(), 0);
}

#[tokio::test]
async fn short_tape_is_insufficient_history() {
    let m = anchored(None);
    let (bars, bench) = (m.series("ACME"), m.series("SPY"));
    let cycle = cycle_over(desk(), Arc::new(m));

    let result = cycle
        .replay("ACME", &bars, &bench, 5, &CancelSignal::never())
        .await;
    assert!(matches!(result, Err(Error::InsufficientHistory { .. })));
}

#[tokio::test]
async fn live_cycle_prices_costs_off_the_quoted_spread() {
    // Default profile: the breakout sits on the newest bar.
    let m = market(SyntheticProfile::default());
    let cycle = cycle_over(desk(), Arc::new(m));

    let report = cycle.decide("ACME", &CancelSignal::never()).await.unwrap();
    let record = report.record().expect("breakout on the newest bar");
    assert_eq!(record.context.spread, 0.0008);
    assert!((record.economics.cost_estimate - 0.0028).abs() < 1e-12);
    assert_eq!(record.context.sentiment_score, 0.0);
    assert!(record.context.liquidity > 0.0 && record.context.liquidity <= 1.0);
}

/// Synthetic data, except for tickers it is told to fail.
struct Flaky {
    inner: SyntheticMarket,
    failing: &'static str,
}

#[async_trait]
impl MarketDataSource for Flaky {
    async fn fetch_history(&self, ticker: &str, lookback_days: u32) -> Result<Vec<Bar>> {
        if ticker == self.failing {
            return Err(Error::RateLimited("429".into()));
        }
        self.inner.fetch_history(ticker, lookback_days).await
    }

    async fn fetch_quote(&self, ticker: &str) -> Result<Quote> {
        self.inner.fetch_quote(ticker).await
    }
}

#[tokio::test]
async fn unavailable_data_fails_only_that_ticker() {
    let source = Arc::new(Flaky {
        inner: market(SyntheticProfile::default()),
        failing: "BROKEN",
    });
    let cycle = cycle_over(desk(), source);

    let err = cycle
        .decide("BROKEN", &CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DataUnavailable { ref ticker, .. } if ticker == "BROKEN"));

    let tickers = vec!["ACME".to_string(), "BROKEN".to_string(), "GLOBEX".to_string()];
    let reports = cycle.run_many(&tickers, &CancelSignal::never()).await;
    let mut names: Vec<&str> = reports.iter().map(|(t, _)| t.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["ACME", "GLOBEX"]);

    // Both decisions drew from the one shared store.
    let pulls: u64 = cycle.store().snapshot().await.iter().map(|a| a.pulls).sum();
    assert_eq!(pulls, 2);
}

struct Headlines(Option<Vec<f64>>);

#[async_trait]
impl SentimentSource for Headlines {
    async fn fetch(&self, _ticker: &str) -> Result<Vec<NewsItem>> {
        match &self.0 {
            Some(scores) => Ok(scores
                .iter()
                .map(|&score| NewsItem {
                    text: "headline".into(),
                    score,
                })
                .collect()),
            None => Err(Error::Config("news feed disabled".into())),
        }
    }
}

#[tokio::test]
async fn sentiment_is_averaged_and_failures_are_neutral() {
    let m = market(SyntheticProfile::default());
    let scored = cycle_over(desk(), Arc::new(m.clone()))
        .with_sentiment(Arc::new(Headlines(Some(vec![0.8, 0.2]))));
    let record = scored
        .decide("ACME", &CancelSignal::never())
        .await
        .unwrap()
        .into_record()
        .unwrap();
    assert!((record.context.sentiment_score - 0.5).abs() < 1e-12);

    let broken = cycle_over(desk(), Arc::new(m)).with_sentiment(Arc::new(Headlines(None)));
    let record = broken
        .decide("ACME", &CancelSignal::never())
        .await
        .unwrap()
        .into_record()
        .unwrap();
    assert_eq!(record.context.sentiment_score, 0.0);
}

/// Never answers within any reasonable timeout.
struct Stalled;

#[async_trait]
impl TextGenerator for Stalled {
    async fn generate(&self, _prompt: &str, _timeout: Duration) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(String::new())
    }
}

#[tokio::test]
async fn stalled_generator_falls_back_and_cancellation_short_circuits() {
    let m = anchored(None);
    let (bars, bench) = (m.series("ACME"), m.series("SPY"));
    let cycle = cycle_over(desk(), Arc::new(m)).with_generator(Arc::new(Stalled));

    let replay = cycle
        .replay("ACME", &bars, &bench, 250, &CancelSignal::never())
        .await
        .unwrap();
    let record = replay.report.record().unwrap();
    assert_eq!(record.plan.source, PlanSource::Fallback);
    assert!(record.plan_note.as_deref().unwrap().contains("attempts exhausted"));
    assert!(record.plan.stop_price < record.plan.entry_price);
    assert!(record.plan.entry_price < record.plan.target_price);

    let (handle, signal) = cancel_pair();
    handle.cancel();
    let replay = cycle.replay("ACME", &bars, &bench, 250, &signal).await.unwrap();
    let record = replay.report.record().unwrap();
    assert_eq!(record.plan.source, PlanSource::Fallback);
    assert!(record.plan_note.as_deref().unwrap().contains("cancelled"));
}

/// Replays a fixed tape one bar at a time, like a live feed, and can be told
/// to throttle the next few history requests.
struct Rolling {
    tapes: Vec<(&'static str, Vec<Bar>)>,
    last_visible: AtomicUsize,
    throttled: AtomicU32,
}

impl Rolling {
    fn visible(&self, ticker: &str) -> Result<Vec<Bar>> {
        let (_, bars) = self
            .tapes
            .iter()
            .find(|(t, _)| *t == ticker)
            .ok_or_else(|| Error::NotFound(ticker.to_string()))?;
        let end = self.last_visible.load(Ordering::SeqCst).min(bars.len() - 1);
        Ok(bars[..=end].to_vec())
    }
}

#[async_trait]
impl MarketDataSource for Rolling {
    async fn fetch_history(&self, ticker: &str, _lookback_days: u32) -> Result<Vec<Bar>> {
        let throttle = self
            .throttled
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if throttle {
            return Err(Error::RateLimited("429".into()));
        }
        self.visible(ticker)
    }

    async fn fetch_quote(&self, ticker: &str) -> Result<Quote> {
        let bars = self.visible(ticker)?;
        let last = bars.last().ok_or_else(|| Error::NotFound(ticker.to_string()))?;
        Ok(Quote {
            price: last.close,
            spread: None,
        })
    }
}

#[tokio::test]
async fn live_decision_settles_later_through_retries() {
    let m = anchored(None);
    let source = Arc::new(Rolling {
        tapes: vec![("ACME", m.series("ACME")), ("SPY", m.series("SPY"))],
        last_visible: AtomicUsize::new(250),
        throttled: AtomicU32::new(0),
    });
    let cycle = cycle_over(desk(), source.clone());

    let mut record = cycle
        .decide("ACME", &CancelSignal::never())
        .await
        .unwrap()
        .into_record()
        .expect("breakout on the decision bar");
    assert_eq!(record.state(), DecisionState::Validated);

    // A cycle whose deadline has passed leaves the decision for later.
    let (handle, cancelled) = cancel_pair();
    handle.cancel();
    let err = cycle.settle_pending(&mut record, &cancelled).await.unwrap_err();
    assert!(matches!(err, Error::DataUnavailable { .. }));
    assert_eq!(record.state(), DecisionState::Validated);

    // More bars print; the first request is throttled and retried.
    source.last_visible.store(usize::MAX, Ordering::SeqCst);
    source.throttled.store(1, Ordering::SeqCst);
    let settlement = cycle
        .settle_pending(&mut record, &CancelSignal::never())
        .await
        .unwrap();
    assert!(matches!(settlement, Settlement::Settled { .. }));
    assert!(matches!(
        record.state(),
        DecisionState::Closed | DecisionState::Expired
    ));
    assert_eq!(source.throttled.load(Ordering::SeqCst), 0);
    let updates: u64 = cycle.store().snapshot().await.iter().map(|a| a.updates).sum();
    assert_eq!(updates, 1);
}
