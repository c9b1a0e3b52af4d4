use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{cancel_pair, CancelSignal, Config, DataSourceKind, DecisionRecord, DecisionState, MarketDataSource};
use engine::{CycleReport, DecisionContract, DecisionCycle, DecisionJournal, DeskConfig, FileMarketData};
use paper::{Settlement, SyntheticMarket, SyntheticProfile};
use planner::HttpTextGenerator;
use selector::BanditStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(
        tickers = %cfg.tickers.join(","),
        benchmark = %cfg.benchmark_ticker,
        data_source = %cfg.data_source,
        "EdgeBot starting"
    );
    let desk = DeskConfig::load(&cfg.desk_config_path)
        .with_context(|| format!("loading desk config {}", cfg.desk_config_path))?
        .with_seed_override(cfg.rng_seed);
    let seed = desk.bandit.seed;

    // ── Database ──────────────────────────────────────────────────────────────
    let journal = DecisionJournal::connect(&cfg.database_url)
        .await
        .context("opening decision journal")?;
    let open = journal.open().await.context("reloading open decisions")?;
    if !open.is_empty() {
        info!(open = open.len(), "Open paper trades reloaded from journal");
    }

    // ── Market data (injected based on DATA_SOURCE) ───────────────────────────
    let market: Arc<dyn MarketDataSource> = match cfg.data_source {
        DataSourceKind::Synthetic => {
            info!(seed, "Synthetic market data");
            Arc::new(SyntheticMarket::new(
                SyntheticProfile::default(),
                seed,
                cfg.benchmark_ticker.clone(),
            ))
        }
        DataSourceKind::Files => {
            info!(dir = %cfg.market_data_dir, "File market data");
            Arc::new(FileMarketData::new(&cfg.market_data_dir))
        }
    };

    // ── Decision cycle ────────────────────────────────────────────────────────
    let store = BanditStore::new(desk.arms.clone(), desk.bandit.clone())
        .context("building strategy selector")?;
    let mut cycle = DecisionCycle::new(desk, market, cfg.benchmark_ticker.clone(), store)
        .context("building decision cycle")?;

    match &cfg.llm_endpoint {
        Some(endpoint) => {
            let generator =
                HttpTextGenerator::new(endpoint.clone(), cfg.llm_api_key.clone(), cfg.llm_model.clone())
                    .context("building text generator")?;
            info!(model = %cfg.llm_model, "Plans requested from text generator");
            cycle = cycle.with_generator(Arc::new(generator));
        }
        None => info!("LLM_ENDPOINT not set, every plan uses the fallback rule"),
    }

    // ── Cycle loop ────────────────────────────────────────────────────────────
    let (cancel_handle, cancel) = cancel_pair();
    let interval = Duration::from_secs(cfg.cycle_interval_secs.max(1));
    let tickers = cfg.tickers.clone();
    let runner = tokio::spawn(async move {
        let mut open = open;
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // A cycle may not outlive its interval.
            let deadline = CancelSignal::clone(&cancel)
                .with_deadline(tokio::time::Instant::now() + interval);

            settle_open(&cycle, &journal, &deadline, &mut open).await;

            for (name, report) in cycle.run_many(&tickers, &deadline).await {
                let CycleReport::Decided(record) = report else {
                    continue;
                };
                let contract = DecisionContract::from_record(&record);
                info!(
                    ticker = %name,
                    verdict = %contract.verdict,
                    arm = %contract.metadata.arm,
                    policy_ok = contract.plan.policy_ok,
                    "Contract issued"
                );
                if let Err(e) = journal.record_decision(&record).await {
                    warn!(ticker = %name, error = %e, "Failed to journal contract");
                }
                if record.state() == DecisionState::Validated {
                    open.push(*record);
                }
            }

            if let Err(e) = journal.snapshot_arms(&cycle.store().snapshot().await).await {
                warn!(error = %e, "Failed to journal arm statistics");
            }
        }
        // Unsettled trades stay in the journal and are reloaded on restart.
        info!(open = open.len(), "Cycle loop stopped");
    });

    info!(interval_secs = interval.as_secs(), "Cycle loop started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting.");
    cancel_handle.cancel();
    runner.await?;
    Ok(())
}

/// Paper-trade every open decision over the bars printed since it was made.
async fn settle_open(
    cycle: &DecisionCycle,
    journal: &DecisionJournal,
    deadline: &CancelSignal,
    open: &mut Vec<DecisionRecord>,
) {
    let mut still_open = Vec::with_capacity(open.len());
    for mut record in open.drain(..) {
        match cycle.settle_pending(&mut record, deadline).await {
            Ok(Settlement::Open { .. }) => {}
            Ok(Settlement::Settled { .. }) => {
                info!(decision_id = %record.decision_id, state = %record.state(), "Paper trade settled");
            }
            Err(e) => {
                warn!(decision_id = %record.decision_id, error = %e, "Settlement deferred");
                if !record.state().is_terminal() {
                    still_open.push(record);
                }
                continue;
            }
        }
        if let Err(e) = journal.record_decision(&record).await {
            warn!(decision_id = %record.decision_id, error = %e, "Failed to journal settlement");
        }
        if !record.state().is_terminal() {
            still_open.push(record);
        }
    }
    *open = still_open;
}
