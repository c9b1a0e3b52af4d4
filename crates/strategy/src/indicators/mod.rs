pub mod atr;
pub mod macd;
pub mod rsi;

pub use atr::atr;
pub use macd::{MacdIndicator, MacdReading, MacdSignal};
pub use rsi::RsiIndicator;

/// Simple moving average of the last `period` values. `None` when there
/// are fewer than `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}
