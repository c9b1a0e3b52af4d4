use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One catalyst pattern entry of the desk config file.
///
/// Example:
/// ```toml
/// [[pattern]]
/// type = "volume_breakout"
///
/// [pattern.params]
/// lookback = 20
/// volume_mult = 2.0
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PatternConfig {
    /// Pattern type identifier: "volume_breakout", "macd_cross" or "rsi_reversal".
    #[serde(rename = "type")]
    pub pattern_type: String,
    /// Pattern-specific parameters. Missing keys take the documented defaults.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl PatternConfig {
    pub fn new(pattern_type: impl Into<String>) -> Self {
        Self {
            pattern_type: pattern_type.into(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// Patterns used when the config file declares none.
pub fn default_patterns() -> Vec<PatternConfig> {
    vec![
        PatternConfig::new("volume_breakout"),
        PatternConfig::new("macd_cross"),
        PatternConfig::new("rsi_reversal"),
    ]
}
