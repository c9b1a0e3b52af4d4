use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use common::{Bar, Error, MarketDataSource, Quote, Result};

/// Daily bars read from `{dir}/{TICKER}.json`, a JSON array of [`Bar`]s.
///
/// Files are re-read on every call, so an external job can refresh them
/// between cycles. There is no order book, so quotes carry no spread.
#[derive(Debug, Clone)]
pub struct FileMarketData {
    dir: PathBuf,
}

impl FileMarketData {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}.json", ticker.trim().to_uppercase()))
    }

    async fn read(&self, ticker: &str) -> Result<Vec<Bar>> {
        if ticker.trim().is_empty() {
            return Err(Error::NotFound("empty ticker".into()));
        }
        let path = self.path_for(ticker);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("no bar file {}", path.display())));
            }
            Err(e) => return Err(e.into()),
        };
        let mut bars: Vec<Bar> = serde_json::from_str(&raw)?;
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        Ok(bars)
    }
}

#[async_trait]
impl MarketDataSource for FileMarketData {
    async fn fetch_history(&self, ticker: &str, lookback_days: u32) -> Result<Vec<Bar>> {
        let bars = self.read(ticker).await?;
        let Some(last_date) = bars.last().map(|b| b.date) else {
            return Ok(bars);
        };
        let since = last_date - chrono::Duration::days(i64::from(lookback_days));
        let history: Vec<Bar> = bars.iter().filter(|b| b.date > since).copied().collect();
        debug!(ticker, bars = history.len(), "History loaded from file");
        Ok(history)
    }

    async fn fetch_quote(&self, ticker: &str) -> Result<Quote> {
        let bars = self.read(ticker).await?;
        let last = bars
            .last()
            .ok_or_else(|| Error::NotFound(format!("bar file for {ticker} is empty")))?;
        Ok(Quote {
            price: last.close,
            spread: None,
        })
    }
}
