pub mod cancel;
pub mod config;
pub mod error;
pub mod market;
pub mod retry;
pub mod types;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::{Config, DataSourceKind};
pub use error::{Error, Result};
pub use market::{MarketDataSource, SentimentSource, TextGenerator};
pub use retry::RetryPolicy;
pub use types::*;
