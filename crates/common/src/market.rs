use std::time::Duration;

use async_trait::async_trait;

use crate::{Bar, NewsItem, Quote, Result};

/// Source of historical bars and live quotes.
///
/// Implementations report throttling as `Error::RateLimited` and unknown
/// tickers as `Error::NotFound`; the decision cycle retries both and then
/// gives up on the ticker for this cycle.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Daily bars covering roughly the last `lookback_days`, oldest first.
    async fn fetch_history(&self, ticker: &str, lookback_days: u32) -> Result<Vec<Bar>>;

    /// Latest price and, when known, the bid/ask spread.
    async fn fetch_quote(&self, ticker: &str) -> Result<Quote>;
}

/// External text-generation capability used by the plan generator.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `prompt`. Implementations should give up
    /// after `timeout`; callers enforce it independently as well.
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String>;
}

/// Optional news/sentiment collaborator.
#[async_trait]
pub trait SentimentSource: Send + Sync {
    async fn fetch(&self, ticker: &str) -> Result<Vec<NewsItem>>;
}
