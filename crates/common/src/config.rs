/// Where the desk reads bars and quotes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    /// Seeded synthetic market, for paper runs.
    Synthetic,
    /// JSON bar files under `MARKET_DATA_DIR`.
    Files,
}

impl std::fmt::Display for DataSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataSourceKind::Synthetic => write!(f, "synthetic"),
            DataSourceKind::Files => write!(f, "files"),
        }
    }
}

/// Process configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    /// Tickers evaluated every cycle.
    pub tickers: Vec<String>,
    /// Ticker whose returns are subtracted to form abnormal returns.
    pub benchmark_ticker: String,

    // Market data
    pub data_source: DataSourceKind,
    pub market_data_dir: String,

    // Text generation. No endpoint means every plan uses the fallback rule.
    pub llm_endpoint: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,

    // Database
    pub database_url: String,

    // Desk settings file (costs, limits, bandit, arms, patterns)
    pub desk_config_path: String,

    pub cycle_interval_secs: u64,
    /// Seed for the strategy selector and the synthetic market. When unset
    /// the desk file's `[bandit] seed` is used.
    pub rng_seed: Option<u64>,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let data_source = match optional_env("DATA_SOURCE")
            .unwrap_or_else(|| "synthetic".to_string())
            .to_lowercase()
            .as_str()
        {
            "synthetic" => DataSourceKind::Synthetic,
            "files" => DataSourceKind::Files,
            other => panic!("ERROR: DATA_SOURCE must be 'synthetic' or 'files', got: '{other}'"),
        };

        let tickers: Vec<String> = required_env("TICKERS")
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if tickers.is_empty() {
            panic!("TICKERS must name at least one ticker");
        }

        Config {
            tickers,
            benchmark_ticker: optional_env("BENCHMARK_TICKER")
                .unwrap_or_else(|| "SPY".to_string()),
            data_source,
            market_data_dir: optional_env("MARKET_DATA_DIR")
                .unwrap_or_else(|| "data".to_string()),
            llm_endpoint: optional_env("LLM_ENDPOINT"),
            llm_api_key: optional_env("LLM_API_KEY"),
            llm_model: optional_env("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            database_url: required_env("DATABASE_URL"),
            desk_config_path: optional_env("DESK_CONFIG_PATH")
                .unwrap_or_else(|| "config/desk.toml".to_string()),
            cycle_interval_secs: optional_env("CYCLE_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(3600),
            rng_seed: optional_env("RNG_SEED").map(|v| {
                v.trim()
                    .parse()
                    .unwrap_or_else(|_| panic!("RNG_SEED must be an unsigned integer, got: '{v}'"))
            }),
        }
    }
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
