use thiserror::Error;

use crate::DecisionState;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Insufficient history: pattern needs {required} bars, got {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("Market data unavailable for {ticker}: {reason}")]
    DataUnavailable { ticker: String, reason: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Text generation failed: {0}")]
    Generation(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Illegal decision transition {from} -> {to}")]
    InvalidTransition {
        from: DecisionState,
        to: DecisionState,
    },

    #[error("Outcome already attached to decision {0}")]
    OutcomeAlreadyAttached(uuid::Uuid),

    #[error("Reward for decision {decision_id} was already applied")]
    DuplicateReward { decision_id: uuid::Uuid },

    #[error("Unknown strategy arm: {0}")]
    UnknownArm(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a market-data or generation call may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited(_)
                | Error::NotFound(_)
                | Error::Http(_)
                | Error::Timeout(_)
                | Error::Generation(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
